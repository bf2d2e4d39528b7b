//! Rolling-window signal processor.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::model::{ContextInputs, Counts, EventKind, SignalEvent, SignalSnapshot};
use super::repository::SignalRepository;
use crate::isp::Isp;
use crate::sync::{read, write};

/// Seconds of history kept in memory.
pub const HORIZON_SECS: i64 = 3600;

const WINDOW_5M_SECS: i64 = 300;
const RECENT_DSN_CODES: usize = 20;
/// Bounce and complaint recipients remembered per ISP.
const RECENT_RECIPIENTS: usize = 1000;

#[derive(Default)]
struct Bucket {
    counts: Counts,
    bounce_ips: HashMap<String, u64>,
}

#[derive(Default)]
struct IspSignals {
    buckets: BTreeMap<i64, Bucket>,
    seen: HashMap<String, i64>,
    recent_codes: VecDeque<(i64, String)>,
    recipients: VecDeque<(i64, EventKind, String)>,
    domain: Option<String>,
}

impl IspSignals {
    fn prune(&mut self, now: i64) {
        let cutoff = now - HORIZON_SECS;
        self.buckets = self.buckets.split_off(&(cutoff + 1));
        self.seen.retain(|_, second| *second > cutoff);
        while self.recent_codes.front().is_some_and(|(s, _)| *s <= cutoff) {
            self.recent_codes.pop_front();
        }
        self.recipients.retain(|(s, _, _)| *s > cutoff);
    }

    fn window(&self, now: i64, secs: i64) -> Counts {
        let mut total = Counts::default();
        for bucket in self.buckets.range(now - secs + 1..=now).map(|(_, b)| b) {
            total.merge(&bucket.counts);
        }
        total
    }
}

type Persisted = (Isp, EventKind, DateTime<Utc>, u64);

/// Maintains trailing-window counters per ISP.
///
/// Each ISP has its own lock, so traffic for one provider never contends
/// with queries for another.
pub struct SignalProcessor {
    isps: HashMap<Isp, RwLock<IspSignals>>,
    persist: Option<mpsc::UnboundedSender<Persisted>>,
}

impl Default for SignalProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalProcessor {
    /// Creates an in-memory processor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            isps: Isp::ALL
                .into_iter()
                .map(|isp| (isp, RwLock::new(IspSignals::default())))
                .collect(),
            persist: None,
        }
    }

    /// Creates a processor that writes counts through to `repository`.
    ///
    /// Writes happen on a background task; a failed write is logged and the
    /// in-memory windows are unaffected.
    #[must_use]
    pub fn with_repository(repository: Arc<SignalRepository>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Persisted>();
        tokio::spawn(async move {
            while let Some((isp, kind, at, delta)) = rx.recv().await {
                if let Err(e) = repository.increment(isp, kind, at, delta).await {
                    warn!(%isp, %kind, error = %e, "Failed to persist signal counter");
                }
            }
        });

        Self {
            persist: Some(tx),
            ..Self::new()
        }
    }

    fn slot(&self, isp: Isp) -> &RwLock<IspSignals> {
        // Every ISP is inserted at construction.
        &self.isps[&isp]
    }

    /// Counts `delta` events of `kind` for `isp`, happening now.
    pub fn record_event(&self, isp: Isp, kind: EventKind, delta: u64) -> bool {
        self.record(&SignalEvent::new(isp, kind, delta))
    }

    /// Counts one event.
    ///
    /// Returns false if the event was ignored: a duplicate identifier, or a
    /// timestamp older than the in-memory horizon.
    pub fn record(&self, event: &SignalEvent) -> bool {
        self.record_at(event, Utc::now())
    }

    /// Counts one event relative to `now`.
    pub fn record_at(&self, event: &SignalEvent, now: DateTime<Utc>) -> bool {
        let now_s = now.timestamp();
        // Clock skew from the transfer agent: count future events as now.
        let second = event.at.timestamp().min(now_s);
        if second <= now_s - HORIZON_SECS {
            debug!(isp = %event.isp, kind = %event.kind, "Ignoring event older than horizon");
            return false;
        }

        {
            let mut signals = write(self.slot(event.isp));
            signals.prune(now_s);

            if let Some(id) = &event.event_id {
                if signals.seen.contains_key(id) {
                    return false;
                }
                signals.seen.insert(id.clone(), second);
            }

            let bucket = signals.buckets.entry(second).or_default();
            bucket.counts.add(event.kind, event.delta);
            if event.kind == EventKind::Bounced {
                if let Some(ip) = &event.source_ip {
                    *bucket.bounce_ips.entry(ip.clone()).or_default() += event.delta;
                }
            }

            if let Some(code) = &event.dsn_code {
                signals.recent_codes.push_back((second, code.clone()));
                while signals.recent_codes.len() > RECENT_DSN_CODES {
                    signals.recent_codes.pop_front();
                }
            }
            if let Some(domain) = &event.domain {
                signals.domain = Some(domain.clone());
            }
            if let Some(rcpt) = &event.recipient
                && matches!(event.kind, EventKind::Bounced | EventKind::Complained)
            {
                signals.recipients.push_back((second, event.kind, rcpt.clone()));
                while signals.recipients.len() > RECENT_RECIPIENTS {
                    signals.recipients.pop_front();
                }
            }
        }

        if let Some(tx) = &self.persist {
            // Receiver only closes when the runtime shuts down.
            let _ = tx.send((event.isp, event.kind, event.at, event.delta));
        }
        true
    }

    /// Returns current rolling rates for `isp`.
    #[must_use]
    pub fn snapshot(&self, isp: Isp) -> SignalSnapshot {
        self.snapshot_at(isp, Utc::now())
    }

    /// Returns rolling rates for `isp` as of `now`.
    #[must_use]
    pub fn snapshot_at(&self, isp: Isp, now: DateTime<Utc>) -> SignalSnapshot {
        let now_s = now.timestamp();
        let signals = read(self.slot(isp));
        let hour = signals.window(now_s, HORIZON_SECS);
        let five = signals.window(now_s, WINDOW_5M_SECS);
        #[allow(clippy::cast_precision_loss)]
        let attempted_rate = five.attempts() as f64 / 5.0;

        SignalSnapshot {
            isp,
            bounce_rate_1h: ratio(hour.bounced, hour.delivered.saturating_add(hour.bounced)),
            deferral_rate_5m: ratio(five.deferred, five.attempts()),
            complaint_rate_1h: ratio(hour.complained, hour.delivered),
            attempted_rate,
            window_1h: hour,
            window_5m: five,
            computed_at: now,
        }
    }

    /// Returns the situational details tracked for `isp`.
    #[must_use]
    pub fn context_inputs(&self, isp: Isp) -> ContextInputs {
        self.context_inputs_at(isp, Utc::now())
    }

    /// Returns the situational details tracked for `isp` as of `now`.
    #[must_use]
    pub fn context_inputs_at(&self, isp: Isp, now: DateTime<Utc>) -> ContextInputs {
        let now_s = now.timestamp();
        let signals = read(self.slot(isp));

        let mut dsn_codes: Vec<String> = Vec::new();
        for (second, code) in signals.recent_codes.iter().rev() {
            if *second > now_s - HORIZON_SECS && !dsn_codes.contains(code) {
                dsn_codes.push(code.clone());
            }
        }

        let mut ips: HashMap<&str, u64> = HashMap::new();
        for bucket in signals
            .buckets
            .range(now_s - HORIZON_SECS + 1..=now_s)
            .map(|(_, b)| b)
        {
            for (ip, count) in &bucket.bounce_ips {
                *ips.entry(ip.as_str()).or_default() += count;
            }
        }
        let top_bounce_ip = ips
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(ip, _)| ip.to_string());

        ContextInputs {
            dsn_codes,
            top_bounce_ip,
            domain: signals.domain.clone(),
        }
    }

    /// Removes and returns the distinct recipients of `kind` events for
    /// `isp` in the trailing hour, oldest first.
    ///
    /// Only bounces and complaints carry recipients.
    pub fn take_recipients(&self, isp: Isp, kind: EventKind, now: DateTime<Utc>) -> Vec<String> {
        let mut signals = write(self.slot(isp));
        signals.prune(now.timestamp());

        let mut taken: Vec<String> = Vec::new();
        signals.recipients.retain(|(_, k, rcpt)| {
            if *k != kind {
                return true;
            }
            if !taken.contains(rcpt) {
                taken.push(rcpt.clone());
            }
            false
        });
        taken
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
