//! In-memory conviction index with asynchronous persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Conviction, ConvictionStats, ScoredConviction, Verdict};
use super::similarity::similarity;
use crate::broadcast::{Broadcaster, Subscription};
use crate::context::MicroContext;
use crate::isp::{AgentKey, AgentType, Isp};
use crate::memory::MemoryStore;
use crate::sync::{read, write};
use crate::Result;

const NAMESPACE: &str = "convictions";
const FLUSH_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Append-only, similarity-searchable memory of verdicts.
///
/// Each (ISP, agent type) has its own lock, created up front, so recall for
/// one agent can never see another agent's convictions.
pub struct ConvictionStore {
    index: HashMap<AgentKey, RwLock<Vec<Conviction>>>,
    memory: Arc<MemoryStore>,
    flush_tx: mpsc::UnboundedSender<(String, Conviction)>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    broadcaster: Broadcaster<Conviction>,
}

impl ConvictionStore {
    /// Creates the store and spawns its persistence task.
    #[must_use]
    pub fn new(memory: Arc<MemoryStore>, subscriber_buffer: usize) -> Self {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        tokio::spawn(flusher(
            Arc::clone(&memory),
            flush_rx,
            Arc::clone(&pending),
            Arc::clone(&drained),
        ));

        Self {
            index: AgentKey::all().map(|k| (k, RwLock::new(Vec::new()))).collect(),
            memory,
            flush_tx,
            pending,
            drained,
            broadcaster: Broadcaster::new("convictions", subscriber_buffer),
        }
    }

    fn slot(&self, key: AgentKey) -> &RwLock<Vec<Conviction>> {
        // Every key is inserted at construction.
        &self.index[&key]
    }

    /// Rehydrates the index from the memory store.
    ///
    /// Unreadable entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory store cannot be read.
    pub async fn load_all(&self) -> Result<usize> {
        let entries = self.memory.list(NAMESPACE).await?;
        let mut grouped: HashMap<AgentKey, Vec<Conviction>> = HashMap::new();

        for (key, value) in entries {
            match serde_json::from_str::<Conviction>(&value) {
                Ok(c) => grouped.entry(c.key()).or_default().push(c),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable conviction"),
            }
        }

        let mut loaded = 0;
        for (key, mut convictions) in grouped {
            convictions.sort_by_key(|c| c.timestamp);
            loaded += convictions.len();
            *write(self.slot(key)) = convictions;
        }

        info!(loaded, "Convictions loaded");
        Ok(loaded)
    }

    /// Records a conviction.
    ///
    /// It is visible to recall immediately, broadcast to subscribers, and
    /// persisted in the background.
    pub fn record(&self, conviction: Conviction) {
        let key = conviction.key();
        {
            let mut convictions = write(self.slot(key));
            let pos = convictions.partition_point(|c| c.timestamp <= conviction.timestamp);
            convictions.insert(pos, conviction.clone());
        }

        self.broadcaster.publish(&conviction);

        let storage_key = format!(
            "{key}/{:020}-{}",
            conviction.timestamp.timestamp_micros(),
            Uuid::new_v4().simple()
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.flush_tx.send((storage_key, conviction)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(agent = %key, "Conviction persistence task has stopped");
        }
        debug!(agent = %key, "Conviction recorded");
    }

    /// Number of convictions not yet persisted.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until every recorded conviction is persisted.
    pub async fn flush(&self) {
        loop {
            let drained = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Returns up to `limit` convictions of this agent ranked by similarity to `query`.
    #[must_use]
    pub fn recall_similar(
        &self,
        isp: Isp,
        agent_type: AgentType,
        query: &MicroContext,
        limit: usize,
    ) -> Vec<ScoredConviction> {
        let convictions = read(self.slot(AgentKey::new(isp, agent_type)));
        let mut scored: Vec<ScoredConviction> = convictions
            .iter()
            .map(|c| ScoredConviction {
                score: similarity(query, &c.context),
                conviction: c.clone(),
            })
            .collect();
        drop(convictions);

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.conviction.timestamp.cmp(&a.conviction.timestamp))
        });
        scored.truncate(limit);
        scored
    }

    /// Returns every conviction of this agent with the given verdict, oldest first.
    #[must_use]
    pub fn recall_by_verdict(
        &self,
        isp: Isp,
        agent_type: AgentType,
        verdict: Verdict,
    ) -> Vec<Conviction> {
        read(self.slot(AgentKey::new(isp, agent_type)))
            .iter()
            .filter(|c| c.verdict == verdict)
            .cloned()
            .collect()
    }

    /// Returns the `limit` most recent convictions of this agent, oldest
    /// first. `None` returns all of them.
    #[must_use]
    pub fn recall_recent(
        &self,
        isp: Isp,
        agent_type: AgentType,
        limit: Option<usize>,
    ) -> Vec<Conviction> {
        let convictions = read(self.slot(AgentKey::new(isp, agent_type)));
        let skip = limit.map_or(0, |n| convictions.len().saturating_sub(n));
        convictions[skip..].to_vec()
    }

    /// Counts this agent's convictions by verdict.
    #[must_use]
    pub fn stats(&self, isp: Isp, agent_type: AgentType) -> ConvictionStats {
        let convictions = read(self.slot(AgentKey::new(isp, agent_type)));
        let will = convictions
            .iter()
            .filter(|c| c.verdict == Verdict::Will)
            .count();
        ConvictionStats {
            will,
            wont: convictions.len() - will,
        }
    }

    /// Convictions per hour over the trailing `window`, for one ISP or all.
    #[must_use]
    pub fn velocity(&self, isp: Option<Isp>, window: Duration) -> f64 {
        self.velocity_at(isp, window, Utc::now())
    }

    fn velocity_at(&self, isp: Option<Isp>, window: Duration, now: DateTime<Utc>) -> f64 {
        let since = now - TimeDelta::from_std(window).unwrap_or(TimeDelta::hours(1));
        let count: usize = self
            .index
            .iter()
            .filter(|(key, _)| isp.is_none_or(|i| key.isp == i))
            .map(|(_, slot)| read(slot).iter().filter(|c| c.timestamp >= since).count())
            .sum();

        let hours = window.as_secs_f64() / 3600.0;
        if hours <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let velocity = count as f64 / hours;
        velocity
    }

    /// Subscribes to newly recorded convictions.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Conviction> {
        self.broadcaster.subscribe()
    }

    /// Cancels a subscription by id.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    /// Returns the broadcaster, for reaping.
    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster<Conviction> {
        &self.broadcaster
    }
}

async fn flusher(
    memory: Arc<MemoryStore>,
    mut rx: mpsc::UnboundedReceiver<(String, Conviction)>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
) {
    while let Some((key, conviction)) = rx.recv().await {
        let mut backoff = Duration::from_millis(50);
        while let Err(e) = memory.put_json(NAMESPACE, &key, &conviction).await {
            warn!(key = %key, error = %e, "Conviction write failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(FLUSH_MAX_BACKOFF);
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            drained.notify_waiters();
        }
    }
}
