//! Per-campaign event attribution with live updates.
//!
//! Also watches for recipients who keep receiving mail without ever opening
//! or clicking, and suppresses them once the configured streak is reached.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use sendguard_acct::{AccountingRecord, RecordType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;
use crate::broadcast::{Broadcaster, Subscription};
use crate::isp::Isp;
use crate::memory::MemoryStore;
use crate::suppression::{Scope, Suppression, SuppressionHub, SuppressionSource, normalize_email};
use crate::sync::{lock, read, write};

const CAMPAIGN_NAMESPACE: &str = "campaigns";
const STREAK_NAMESPACE: &str = "inactivity-streaks";

/// Accounting records remembered for duplicate detection.
const SEEN_CAPACITY: usize = 100_000;

/// Default idle horizon for campaigns and streaks.
const DEFAULT_IDLE_DAYS: i64 = 30;

/// Counters for one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Campaign identifier.
    pub campaign_id: String,
    /// Messages received for delivery.
    pub sent: u64,
    /// Delivered.
    pub delivered: u64,
    /// Bounced.
    pub bounced: u64,
    /// Deferred at least once.
    pub deferred: u64,
    /// Complaints.
    pub complained: u64,
    /// Unsubscribes.
    pub unsubscribed: u64,
    /// Opens.
    pub opened: u64,
    /// Clicks.
    pub clicked: u64,
    /// First event.
    pub first_seen: DateTime<Utc>,
    /// Latest event.
    pub last_updated: DateTime<Utc>,
}

impl CampaignStats {
    fn new(campaign_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            sent: 0,
            delivered: 0,
            bounced: 0,
            deferred: 0,
            complained: 0,
            unsubscribed: 0,
            opened: 0,
            clicked: 0,
            first_seen: at,
            last_updated: at,
        }
    }

    /// Delivered share of finished attempts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delivery_rate(&self) -> f64 {
        let finished = self.delivered.saturating_add(self.bounced);
        if finished == 0 {
            0.0
        } else {
            self.delivered as f64 / finished as f64
        }
    }
}

/// Kind of engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementKind {
    /// Message opened.
    Open,
    /// Link clicked.
    Click,
}

/// An open or click reported by the tracking pixel or link redirector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    /// Kind.
    pub kind: EngagementKind,
    /// Recipient.
    pub email: String,
    /// Campaign, if known.
    #[serde(default)]
    pub campaign_id: Option<String>,
    /// When it happened; defaults to receipt time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Deliveries to one recipient since their last engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Streak {
    count: u32,
    last_delivery: DateTime<Utc>,
}

/// Bounded set of accounting event ids, oldest evicted first.
#[derive(Default)]
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    fn insert(&mut self, id: String) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.order.len() >= SEEN_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.ids.insert(id.clone());
        self.order.push_back(id);
        true
    }
}

/// Keys touched since the last persist.
#[derive(Default)]
struct Dirty {
    campaigns: HashSet<String>,
    streaks: HashSet<String>,
}

/// Campaign counters and inactivity detection.
pub struct CampaignTracker {
    campaigns: RwLock<HashMap<String, CampaignStats>>,
    streaks: Mutex<HashMap<String, Streak>>,
    seen: Mutex<SeenIds>,
    dirty: Mutex<Dirty>,
    inactivity_threshold: u32,
    idle_horizon: TimeDelta,
    hub: Option<Arc<SuppressionHub>>,
    memory: Option<Arc<MemoryStore>>,
    broadcaster: Broadcaster<CampaignStats>,
}

impl CampaignTracker {
    /// Creates a tracker. A zero `inactivity_threshold` disables inactivity
    /// suppression.
    #[must_use]
    pub fn new(
        inactivity_threshold: u32,
        hub: Option<Arc<SuppressionHub>>,
        subscriber_buffer: usize,
    ) -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            streaks: Mutex::new(HashMap::new()),
            seen: Mutex::new(SeenIds::default()),
            dirty: Mutex::new(Dirty::default()),
            inactivity_threshold,
            idle_horizon: TimeDelta::days(DEFAULT_IDLE_DAYS),
            hub,
            memory: None,
            broadcaster: Broadcaster::new("campaigns", subscriber_buffer),
        }
    }

    /// Persists campaigns and streaks to `memory`.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets how long a campaign or streak may stay idle before it is evicted.
    #[must_use]
    pub fn with_idle_days(mut self, days: u32) -> Self {
        self.idle_horizon = TimeDelta::days(i64::from(days.max(1)));
        self
    }

    /// Restores persisted campaigns and streaks. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory store cannot be read.
    pub async fn load(&self) -> Result<usize> {
        let Some(memory) = &self.memory else {
            return Ok(0);
        };

        let mut loaded = 0;
        for (key, value) in memory.list(CAMPAIGN_NAMESPACE).await? {
            match serde_json::from_str::<CampaignStats>(&value) {
                Ok(stats) => {
                    write(&self.campaigns).insert(key, stats);
                    loaded += 1;
                }
                Err(e) => warn!(campaign = %key, error = %e, "Skipping unreadable campaign"),
            }
        }
        for (key, value) in memory.list(STREAK_NAMESPACE).await? {
            match serde_json::from_str::<Streak>(&value) {
                Ok(streak) => {
                    lock(&self.streaks).insert(key, streak);
                    loaded += 1;
                }
                Err(e) => warn!(email = %key, error = %e, "Skipping unreadable streak"),
            }
        }
        debug!(loaded, "Loaded campaign tracker state");
        Ok(loaded)
    }

    /// Evicts campaigns and streaks idle past the horizon, then writes what
    /// changed since the last call. Returns the number evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory store cannot be written. Keys that
    /// were not written stay pending for the next call.
    pub async fn maintain(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.idle_horizon;
        let mut evicted = 0;
        {
            let mut campaigns = write(&self.campaigns);
            let mut dirty = lock(&self.dirty);
            campaigns.retain(|id, stats| {
                let keep = stats.last_updated > cutoff;
                if !keep {
                    dirty.campaigns.insert(id.clone());
                    evicted += 1;
                }
                keep
            });
        }
        {
            let mut streaks = lock(&self.streaks);
            let mut dirty = lock(&self.dirty);
            streaks.retain(|email, streak| {
                let keep = streak.last_delivery > cutoff;
                if !keep {
                    dirty.streaks.insert(email.clone());
                    evicted += 1;
                }
                keep
            });
        }
        if evicted > 0 {
            info!(evicted, "Evicted idle campaigns and streaks");
        }

        self.persist().await?;
        Ok(evicted)
    }

    /// Writes campaigns and streaks changed since the last persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory store cannot be written.
    pub async fn persist(&self) -> Result<()> {
        let Some(memory) = &self.memory else {
            *lock(&self.dirty) = Dirty::default();
            return Ok(());
        };

        let pending = std::mem::take(&mut *lock(&self.dirty));
        let mut campaigns = pending.campaigns.into_iter();
        while let Some(id) = campaigns.next() {
            let stats = read(&self.campaigns).get(&id).cloned();
            let written = match stats {
                Some(stats) => memory.put_json(CAMPAIGN_NAMESPACE, &id, &stats).await,
                None => memory.delete(CAMPAIGN_NAMESPACE, &id).await.map(|_| ()),
            };
            if let Err(e) = written {
                let mut dirty = lock(&self.dirty);
                dirty.campaigns.insert(id);
                dirty.campaigns.extend(campaigns);
                dirty.streaks.extend(pending.streaks);
                return Err(e);
            }
        }

        let mut streaks = pending.streaks.into_iter();
        while let Some(email) = streaks.next() {
            let streak = lock(&self.streaks).get(&email).copied();
            let written = match streak {
                Some(streak) => memory.put_json(STREAK_NAMESPACE, &email, &streak).await,
                None => memory.delete(STREAK_NAMESPACE, &email).await.map(|_| ()),
            };
            if let Err(e) = written {
                let mut dirty = lock(&self.dirty);
                dirty.streaks.insert(email);
                dirty.streaks.extend(streaks);
                return Err(e);
            }
        }
        Ok(())
    }

    fn clear_streak(&self, email: String) {
        if lock(&self.streaks).remove(&email).is_some() {
            lock(&self.dirty).streaks.insert(email);
        }
    }

    fn update(&self, campaign_id: &str, at: DateTime<Utc>, apply: impl FnOnce(&mut CampaignStats)) {
        lock(&self.dirty).campaigns.insert(campaign_id.to_string());
        let stats = {
            let mut campaigns = write(&self.campaigns);
            let stats = campaigns
                .entry(campaign_id.to_string())
                .or_insert_with(|| CampaignStats::new(campaign_id, at));
            apply(stats);
            stats.last_updated = stats.last_updated.max(at);
            stats.clone()
        };
        self.broadcaster.publish(&stats);
    }

    /// Attributes an accounting record to its campaign.
    ///
    /// A record seen before (same event id) is ignored.
    pub async fn record_accounting(&self, record: &AccountingRecord) {
        let event_id = record.event_id();
        if !lock(&self.seen).insert(event_id.clone()) {
            debug!(event_id = %event_id, "Ignoring duplicate accounting record");
            return;
        }

        if let Some(campaign_id) = record.campaign_id.as_deref() {
            self.update(campaign_id, record.time_logged, |s| {
                let counter = match record.record_type {
                    RecordType::Reception => &mut s.sent,
                    RecordType::Delivery => &mut s.delivered,
                    RecordType::Bounce | RecordType::RemoteBounce => &mut s.bounced,
                    RecordType::Transient => &mut s.deferred,
                    RecordType::Feedback => &mut s.complained,
                    RecordType::RemoteStatus => return,
                };
                *counter = counter.saturating_add(1);
            });
        }

        if record.record_type == RecordType::Delivery {
            self.note_delivery(record).await;
        }
    }

    async fn note_delivery(&self, record: &AccountingRecord) {
        if self.inactivity_threshold == 0 {
            return;
        }
        let email = normalize_email(record.rcpt.as_str());
        let streak = {
            let mut streaks = lock(&self.streaks);
            let streak = streaks.entry(email.clone()).or_insert(Streak {
                count: 0,
                last_delivery: record.time_logged,
            });
            streak.count = streak.count.saturating_add(1);
            streak.last_delivery = streak.last_delivery.max(record.time_logged);
            streak.count
        };
        lock(&self.dirty).streaks.insert(email.clone());
        if streak < self.inactivity_threshold {
            return;
        }

        self.clear_streak(email.clone());
        let Some(hub) = &self.hub else {
            return;
        };
        let entry = Suppression::new(
            &email,
            Scope::Isp(Isp::from_email(&email)),
            SuppressionSource::Inactivity,
            format!("{streak} deliveries without engagement"),
        )
        .with_campaign_id(record.campaign_id.clone());
        match hub.suppress(&entry).await {
            Ok(true) => info!(email = %email, streak, "Suppressed inactive recipient"),
            Ok(false) => {}
            Err(e) => warn!(email = %email, error = %e, "Failed to suppress inactive recipient"),
        }
    }

    /// Records an open or click and resets the recipient's inactivity streak.
    pub fn record_engagement(&self, event: &EngagementEvent) {
        self.clear_streak(normalize_email(&event.email));
        if let Some(campaign_id) = event.campaign_id.as_deref() {
            let at = event.timestamp.unwrap_or_else(Utc::now);
            self.update(campaign_id, at, |s| match event.kind {
                EngagementKind::Open => s.opened = s.opened.saturating_add(1),
                EngagementKind::Click => s.clicked = s.clicked.saturating_add(1),
            });
        }
    }

    /// Records a feedback-loop complaint against its campaign.
    pub fn record_complaint(&self, campaign_id: Option<&str>, at: DateTime<Utc>) {
        if let Some(campaign_id) = campaign_id {
            self.update(campaign_id, at, |s| s.complained = s.complained.saturating_add(1));
        }
    }

    /// Records an unsubscribe against its campaign.
    pub fn record_unsubscribe(&self, email: &str, campaign_id: Option<&str>) {
        self.clear_streak(normalize_email(email));
        if let Some(campaign_id) = campaign_id {
            self.update(campaign_id, Utc::now(), |s| {
                s.unsubscribed = s.unsubscribed.saturating_add(1);
            });
        }
    }

    /// Counters for one campaign.
    #[must_use]
    pub fn get(&self, campaign_id: &str) -> Option<CampaignStats> {
        read(&self.campaigns).get(campaign_id).cloned()
    }

    /// Every campaign, most recently active first.
    #[must_use]
    pub fn list(&self) -> Vec<CampaignStats> {
        let mut all: Vec<CampaignStats> = read(&self.campaigns).values().cloned().collect();
        all.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        all
    }

    /// Subscribes to campaign updates.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<CampaignStats> {
        self.broadcaster.subscribe()
    }

    /// Returns the broadcaster, for reaping.
    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster<CampaignStats> {
        &self.broadcaster
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use sendguard_acct::Address;

    use super::*;
    use crate::db;
    use crate::executor::DryRunExecutor;
    use crate::settings::{CommandTemplates, SuppressionSettings};
    use crate::suppression::SuppressionRepository;

    static JOBS: AtomicU64 = AtomicU64::new(0);

    fn record_at(
        kind: RecordType,
        rcpt: &str,
        campaign: Option<&str>,
        at: DateTime<Utc>,
    ) -> AccountingRecord {
        let mut record = AccountingRecord::new(kind, Address::new(rcpt).unwrap(), at);
        record.campaign_id = campaign.map(ToString::to_string);
        record.job_id = Some(JOBS.fetch_add(1, Ordering::Relaxed).to_string());
        record
    }

    fn record(kind: RecordType, rcpt: &str, campaign: Option<&str>) -> AccountingRecord {
        record_at(kind, rcpt, campaign, Utc::now())
    }

    async fn hub() -> Arc<SuppressionHub> {
        let repo = Arc::new(SuppressionRepository::new(db::in_memory().await.unwrap()).await.unwrap());
        Arc::new(SuppressionHub::new(
            repo,
            Arc::new(DryRunExecutor::new(CommandTemplates::default())),
            SuppressionSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_counts_by_campaign() {
        let tracker = CampaignTracker::new(0, None, 16);
        let mut sub = tracker.subscribe();

        tracker.record_accounting(&record(RecordType::Reception, "a@x.com", Some("c1"))).await;
        tracker.record_accounting(&record(RecordType::Delivery, "a@x.com", Some("c1"))).await;
        tracker.record_accounting(&record(RecordType::Bounce, "b@x.com", Some("c1"))).await;
        tracker.record_accounting(&record(RecordType::Delivery, "c@x.com", None)).await;
        tracker.record_engagement(&EngagementEvent {
            kind: EngagementKind::Click,
            email: "a@x.com".to_string(),
            campaign_id: Some("c1".to_string()),
            timestamp: None,
        });
        tracker.record_unsubscribe("a@x.com", Some("c1"));

        let stats = tracker.get("c1").unwrap();
        assert_eq!((stats.sent, stats.delivered, stats.bounced), (1, 1, 1));
        assert_eq!((stats.clicked, stats.unsubscribed), (1, 1));
        assert!((stats.delivery_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(tracker.list().len(), 1);
        assert_eq!(sub.recv().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn test_inactivity_suppresses_after_streak() {
        let hub = hub().await;
        let tracker = CampaignTracker::new(3, Some(Arc::clone(&hub)), 16);

        for _ in 0..2 {
            tracker.record_accounting(&record(RecordType::Delivery, "idle@gmail.com", Some("c"))).await;
        }
        tracker.record_engagement(&EngagementEvent {
            kind: EngagementKind::Open,
            email: "idle@gmail.com".to_string(),
            campaign_id: None,
            timestamp: None,
        });
        tracker.record_accounting(&record(RecordType::Delivery, "idle@gmail.com", Some("c"))).await;
        assert!(hub.check_send("idle@gmail.com"));

        for _ in 0..2 {
            tracker.record_accounting(&record(RecordType::Delivery, "idle@gmail.com", Some("c"))).await;
        }
        assert!(!hub.check_send("idle@gmail.com"));
        let entry = &hub.list(None, 10, 0).await[0];
        assert_eq!(entry.source, SuppressionSource::Inactivity);
    }

    #[tokio::test]
    async fn test_duplicate_record_counted_once() {
        let hub = hub().await;
        let tracker = CampaignTracker::new(2, Some(Arc::clone(&hub)), 16);

        let delivery = record(RecordType::Delivery, "twice@gmail.com", Some("c"));
        tracker.record_accounting(&delivery).await;
        tracker.record_accounting(&delivery).await;

        assert_eq!(tracker.get("c").unwrap().delivered, 1);
        assert!(hub.check_send("twice@gmail.com"));

        tracker.record_accounting(&record(RecordType::Delivery, "twice@gmail.com", Some("c"))).await;
        assert_eq!(tracker.get("c").unwrap().delivered, 2);
        assert!(!hub.check_send("twice@gmail.com"));
    }

    #[tokio::test]
    async fn test_idle_entries_evicted_and_rest_survive_restart() {
        let memory = Arc::new(MemoryStore::new(db::in_memory().await.unwrap()).await.unwrap());
        let now = Utc::now();
        let tracker = CampaignTracker::new(3, None, 16)
            .with_memory(Arc::clone(&memory))
            .with_idle_days(30);

        let stale = now - TimeDelta::days(40);
        tracker
            .record_accounting(&record_at(RecordType::Delivery, "old@gmail.com", Some("old"), stale))
            .await;
        for _ in 0..2 {
            tracker
                .record_accounting(&record_at(RecordType::Delivery, "new@gmail.com", Some("new"), now))
                .await;
        }
        tracker.persist().await.unwrap();
        assert_eq!(memory.list(STREAK_NAMESPACE).await.unwrap().len(), 2);

        assert_eq!(tracker.maintain(now).await.unwrap(), 2);
        assert!(tracker.get("old").is_none());
        assert_eq!(tracker.list().len(), 1);
        assert_eq!(memory.list(CAMPAIGN_NAMESPACE).await.unwrap().len(), 1);
        assert_eq!(memory.list(STREAK_NAMESPACE).await.unwrap().len(), 1);
        assert_eq!(tracker.maintain(now).await.unwrap(), 0);

        let hub = hub().await;
        let restarted = CampaignTracker::new(3, Some(Arc::clone(&hub)), 16).with_memory(memory);
        assert_eq!(restarted.load().await.unwrap(), 2);
        assert_eq!(restarted.get("new").unwrap().delivered, 2);

        restarted
            .record_accounting(&record_at(RecordType::Delivery, "new@gmail.com", Some("new"), now))
            .await;
        assert!(!hub.check_send("new@gmail.com"));
        assert!(hub.check_send("old@gmail.com"));
    }

    #[tokio::test]
    async fn test_engagement_clears_persisted_streak() {
        let memory = Arc::new(MemoryStore::new(db::in_memory().await.unwrap()).await.unwrap());
        let tracker = CampaignTracker::new(5, None, 16).with_memory(Arc::clone(&memory));

        tracker.record_accounting(&record(RecordType::Delivery, "fan@gmail.com", None)).await;
        tracker.persist().await.unwrap();
        assert_eq!(memory.list(STREAK_NAMESPACE).await.unwrap().len(), 1);

        tracker.record_unsubscribe("fan@gmail.com", None);
        tracker.persist().await.unwrap();
        assert!(memory.list(STREAK_NAMESPACE).await.unwrap().is_empty());
    }
}
