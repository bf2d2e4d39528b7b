//! Engine assembly and lifecycle.
//!
//! [`Engine::open`] builds every store on one database pool, wires every
//! suppression source into the hub and loads prior state. [`Engine::start`]
//! spawns the background tasks; [`Running::stop`] shuts them down in order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use sqlx::sqlite::SqlitePool;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::Result;
use crate::alerter::Alerter;
use crate::convictions::ConvictionStore;
use crate::decisions::DecisionLog;
use crate::executor::Executor;
use crate::ingest::{
    AccountingSink, AccountingTail, Fanout, IngestWorker, Ingestor, SignalSink, SuppressionFeed,
    TrackerSink,
};
use crate::memory::MemoryStore;
use crate::orchestrator::{Components, Orchestrator};
use crate::rules::{RuleRepository, RuleStore};
use crate::settings::Settings;
use crate::signals::{SignalProcessor, SignalRepository};
use crate::suppression::{SuppressionHub, SuppressionRepository, SuppressionSink, SuppressionStore};
use crate::sync::lock;
use crate::thoughts::ThoughtStream;
use crate::tracker::CampaignTracker;

/// Hourly signal counters older than this are pruned.
const SIGNAL_RETENTION_DAYS: i64 = 30;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Every component of a running engine.
pub struct Engine {
    /// Loaded settings.
    pub settings: Settings,
    /// Rolling signal rates.
    pub signals: Arc<SignalProcessor>,
    /// Precedent memory.
    pub convictions: Arc<ConvictionStore>,
    /// Per-ISP suppression lists.
    pub suppressions: Arc<SuppressionStore>,
    /// Global suppression list.
    pub hub: Arc<SuppressionHub>,
    /// Thresholds and rules.
    pub rules: Arc<RuleStore>,
    /// Audit trail.
    pub decisions: Arc<DecisionLog>,
    /// Campaign counters.
    pub tracker: Arc<CampaignTracker>,
    /// Narration.
    pub thoughts: Arc<ThoughtStream>,
    /// Control loop.
    pub orchestrator: Arc<Orchestrator>,
    /// Inbound event queue.
    pub ingestor: Ingestor,
    /// Remote commands.
    pub executor: Arc<dyn Executor>,
    signal_repo: Arc<SignalRepository>,
    worker: Mutex<Option<IngestWorker>>,
    tail: Mutex<Option<AccountingTail>>,
}

impl Engine {
    /// Builds the engine on `pool` and loads prior state.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema cannot be created or prior state cannot
    /// be loaded. Either is fatal: starting without prior state risks sending
    /// to suppressed recipients.
    pub async fn open(
        settings: Settings,
        pool: SqlitePool,
        executor: Arc<dyn Executor>,
        alerter: Arc<dyn Alerter>,
    ) -> Result<Self> {
        let buffer = settings.streams.subscriber_buffer;

        let memory = Arc::new(MemoryStore::new(pool.clone()).await?);
        let signal_repo = Arc::new(SignalRepository::new(pool.clone()).await?);
        let suppression_repo = Arc::new(SuppressionRepository::new(pool.clone()).await?);
        let rule_repo = Arc::new(RuleRepository::new(pool).await?);

        let hub = Arc::new(SuppressionHub::new(
            Arc::clone(&suppression_repo),
            Arc::clone(&executor),
            settings.suppression.clone(),
        ));
        let sink: Arc<dyn SuppressionSink> = hub.clone();
        let suppressions = Arc::new(SuppressionStore::new(suppression_repo, Some(sink)));
        let signals = Arc::new(SignalProcessor::with_repository(Arc::clone(&signal_repo)));
        let convictions = Arc::new(ConvictionStore::new(Arc::clone(&memory), buffer));
        let rules = Arc::new(RuleStore::new(rule_repo));
        let decisions = Arc::new(DecisionLog::new(Arc::clone(&memory)));
        let thoughts = Arc::new(ThoughtStream::new(buffer));
        let tracker = Arc::new(
            CampaignTracker::new(
                settings.tracker.inactivity_threshold,
                Some(Arc::clone(&hub)),
                buffer,
            )
            .with_memory(Arc::clone(&memory))
            .with_idle_days(settings.tracker.idle_days),
        );
        tracker.load().await?;

        let sinks: Vec<Arc<dyn AccountingSink>> = vec![
            Arc::new(SignalSink::new(Arc::clone(&signals))),
            Arc::new(TrackerSink::new(Arc::clone(&tracker))),
            Arc::new(SuppressionFeed::new(
                Arc::clone(&suppressions),
                Arc::clone(&hub),
            )),
        ];
        let fanout = Fanout::new(sinks);
        let (ingestor, worker) = Ingestor::new(settings.ingest.queue_capacity, fanout.clone());
        let tail = settings.ingest.accounting_file.clone().map(|path| {
            AccountingTail::new(
                path,
                Duration::from_millis(settings.ingest.poll_interval_ms.max(10)),
                Arc::clone(&memory),
                fanout,
            )
        });

        let orchestrator = Arc::new(Orchestrator::new(
            Components {
                signals: Arc::clone(&signals),
                convictions: Arc::clone(&convictions),
                suppressions: Arc::clone(&suppressions),
                hub: Arc::clone(&hub),
                rules: Arc::clone(&rules),
                decisions: Arc::clone(&decisions),
                executor: Arc::clone(&executor),
                alerter,
                thoughts: Arc::clone(&thoughts),
                memory,
            },
            settings.engine.clone(),
        ));
        orchestrator.initialize().await?;

        info!(
            global_suppressions = hub.entry_count(),
            decisions = decisions.len(),
            "Engine opened"
        );

        Ok(Self {
            settings,
            signals,
            convictions,
            suppressions,
            hub,
            rules,
            decisions,
            tracker,
            thoughts,
            orchestrator,
            ingestor,
            executor,
            signal_repo,
            worker: Mutex::new(Some(worker)),
            tail: Mutex::new(tail),
        })
    }

    /// Spawns the agent loops, ingest worker, accounting tail, hub sync,
    /// subscriber reapers and maintenance.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the engine was already started.
    pub fn start(&self) -> Result<Running> {
        let Some(worker) = lock(&self.worker).take() else {
            return Err(crate::Error::Config("engine already started".to_string()));
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let (hub_tx, hub_rx) = watch::channel(false);

        let mut tasks = self.orchestrator.start(stop_rx.clone());
        tasks.spawn(worker.run(stop_rx.clone()));
        if let Some(tail) = lock(&self.tail).take() {
            tasks.spawn(tail.run(stop_rx.clone()));
        }
        tasks.spawn(maintenance(
            Arc::clone(&self.signal_repo),
            Arc::clone(&self.tracker),
            stop_rx.clone(),
        ));

        let keepalive = Duration::from_secs(self.settings.streams.keepalive_secs.max(1));
        let reapers = vec![
            self.convictions
                .broadcaster()
                .spawn_reaper(keepalive, stop_rx.clone()),
            self.thoughts
                .broadcaster()
                .spawn_reaper(keepalive, stop_rx.clone()),
            self.tracker.broadcaster().spawn_reaper(keepalive, stop_rx),
        ];

        let hub = tokio::spawn(Arc::clone(&self.hub).run(hub_rx));

        info!(tasks = tasks.len(), "Engine started");
        Ok(Running {
            stop_tx,
            hub_tx,
            tasks,
            reapers,
            hub,
            convictions: Arc::clone(&self.convictions),
            tracker: Arc::clone(&self.tracker),
        })
    }
}

/// Background tasks of a started engine.
pub struct Running {
    stop_tx: watch::Sender<bool>,
    hub_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    reapers: Vec<JoinHandle<()>>,
    hub: JoinHandle<()>,
    convictions: Arc<ConvictionStore>,
    tracker: Arc<CampaignTracker>,
}

impl Running {
    /// Stops every task.
    ///
    /// Agents finish their current evaluation and the ingest worker drains
    /// its queue before the hub makes its final sync, so no suppression
    /// accepted before shutdown misses the exported list. Pending convictions
    /// and campaign tracker state are flushed last.
    pub async fn stop(mut self) {
        info!("Stopping engine");
        let _ = self.stop_tx.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
        for reaper in self.reapers {
            let _ = reaper.await;
        }

        let _ = self.hub_tx.send(true);
        if let Err(e) = self.hub.await {
            warn!(error = %e, "Suppression sync task ended abnormally");
        }

        self.convictions.flush().await;
        if let Err(e) = self.tracker.persist().await {
            warn!(error = %e, "Failed to persist campaign tracker state");
        }
        info!("Engine stopped");
    }
}

async fn maintenance(
    repo: Arc<SignalRepository>,
    tracker: Arc<CampaignTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                match repo.prune(now - TimeDelta::days(SIGNAL_RETENTION_DAYS)).await {
                    Ok(0) => {}
                    Ok(pruned) => debug!(pruned, "Pruned old signal counters"),
                    Err(e) => warn!(error = %e, "Failed to prune signal counters"),
                }
                if let Err(e) = tracker.maintain(now).await {
                    warn!(error = %e, "Failed to maintain campaign tracker");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
