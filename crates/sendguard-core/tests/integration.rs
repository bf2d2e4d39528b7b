//! End-to-end tests of the governance engine.
//!
//! Each test opens a full [`Engine`] on its own database with a recording
//! executor and an in-memory alerter, so no transfer-agent host is needed.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use sendguard_core::alerter::MemoryAlerter;
use sendguard_core::context::MicroContext;
use sendguard_core::convictions::{Conviction, ConvictionStore, Verdict};
use sendguard_core::decisions::ActionTaken;
use sendguard_core::executor::Executor;
use sendguard_core::memory::MemoryStore;
use sendguard_core::orchestrator::Evaluation;
use sendguard_core::signals::EventKind;
use sendguard_core::suppression::{Scope, Suppression, SuppressionRepository, SuppressionSource};
use sendguard_core::{AgentKey, AgentStatus, AgentType, Engine, Isp, Result, Settings, db};

/// Executor that records what it was asked to do.
#[derive(Default)]
struct RecordingExecutor {
    actions: Mutex<Vec<ActionTaken>>,
    pushes: Mutex<Vec<String>>,
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, action: &ActionTaken) -> Result<String> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(String::new())
    }

    async fn push_file(&self, _remote_path: &str, contents: &str) -> Result<()> {
        self.pushes.lock().unwrap().push(contents.to_string());
        Ok(())
    }
}

struct Harness {
    engine: Engine,
    executor: Arc<RecordingExecutor>,
    alerter: Arc<MemoryAlerter>,
}

async fn harness(pool: sqlx::SqlitePool) -> Harness {
    let executor = Arc::new(RecordingExecutor::default());
    let alerter = Arc::new(MemoryAlerter::new());
    let engine = Engine::open(Settings::default(), pool, executor.clone(), alerter.clone())
        .await
        .unwrap();
    Harness {
        engine,
        executor,
        alerter,
    }
}

async fn in_memory() -> Harness {
    harness(db::in_memory().await.unwrap()).await
}

fn yahoo_entry(email: &str, source: SuppressionSource) -> Suppression {
    Suppression::new(email, Scope::Isp(Isp::Yahoo), source, "test")
}

#[tokio::test]
async fn test_suppression_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sendguard.db");
    let path = path.to_str().unwrap();

    {
        let pool = db::connect(path).await.unwrap();
        let h = harness(pool.clone()).await;
        let entry = yahoo_entry("Restart@Yahoo.com", SuppressionSource::HardBounce);
        assert!(h.engine.suppressions.suppress(&entry).await.unwrap());
        assert!(h.engine.suppressions.is_suppressed(Isp::Yahoo, "restart@yahoo.com"));
        pool.close().await;
    }

    let h = harness(db::connect(path).await.unwrap()).await;
    assert!(h.engine.suppressions.is_suppressed(Isp::Yahoo, "restart@yahoo.com"));
    assert!(!h.engine.hub.check_send("restart@yahoo.com"));
    assert!(!h.engine.suppressions.is_suppressed(Isp::Gmail, "restart@yahoo.com"));
}

#[tokio::test]
async fn test_restart_repairs_entry_that_never_reached_hub() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sendguard.db");
    let path = path.to_str().unwrap();
    let entry = yahoo_entry("crash@yahoo.com", SuppressionSource::HardBounce);

    {
        // The per-ISP row is committed, then the process dies before the hub
        // hears about it.
        let pool = db::connect(path).await.unwrap();
        let repo = SuppressionRepository::new(pool.clone()).await.unwrap();
        assert!(repo.insert(&entry).await.unwrap());
        pool.close().await;
    }

    let h = harness(db::connect(path).await.unwrap()).await;
    assert!(h.engine.suppressions.is_suppressed(Isp::Yahoo, "crash@yahoo.com"));
    assert!(!h.engine.suppressions.suppress(&entry).await.unwrap());
    assert!(!h.engine.hub.check_send("crash@yahoo.com"));
    assert_eq!(h.engine.hub.entry_count(), 1);
    assert!(h.engine.hub.is_dirty());

    let report = h.engine.hub.sync_now().await.unwrap();
    assert_eq!(report.entries, 1);
    let pushed = h.executor.pushes.lock().unwrap().last().cloned().unwrap();
    assert!(pushed.lines().any(|l| l == "crash@yahoo.com"));
}

#[tokio::test]
async fn test_redelivered_accounting_line_counts_once_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sendguard.db");
    let path = path.to_str().unwrap();
    let logged = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%z");
    let line = format!(
        "d,{logged},,news@brand.example,reader@yahoo.com,,relayed,2.0.0,smtp;250 ok,\
         mta5.am0.yahoodns.net,,smtp,,smtp,10.0.0.5,98.136.96.1,,1234,vmta-a,\
         job-9,env-9,yahoo.com/vmta-a,pool-1,autumn\n"
    );

    {
        let pool = db::connect(path).await.unwrap();
        let h = harness(pool.clone()).await;
        let running = h.engine.start().unwrap();
        h.engine.ingestor.submit_accounting_csv(&line).unwrap();
        h.engine.ingestor.submit_accounting_csv(&line).unwrap();
        running.stop().await;

        assert_eq!(h.engine.tracker.get("autumn").unwrap().delivered, 1);
        pool.close().await;
    }

    let h = harness(db::connect(path).await.unwrap()).await;
    assert_eq!(h.engine.tracker.get("autumn").unwrap().delivered, 1);
}

#[tokio::test]
async fn test_suppressing_twice_keeps_count() {
    let h = in_memory().await;
    let entry = yahoo_entry("twice@yahoo.com", SuppressionSource::Complaint);

    assert!(h.engine.suppressions.suppress(&entry).await.unwrap());
    let after_first = h.engine.suppressions.entry_count(Isp::Yahoo);
    assert!(!h.engine.suppressions.suppress(&entry).await.unwrap());

    assert_eq!(h.engine.suppressions.entry_count(Isp::Yahoo), after_first);
    assert_eq!(h.engine.hub.entry_count(), 1);
}

#[tokio::test]
async fn test_csv_import_counts_invalid_and_duplicates() {
    let h = in_memory().await;
    for i in 0..3 {
        let entry = yahoo_entry(&format!("user{i}@yahoo.com"), SuppressionSource::HardBounce);
        h.engine.suppressions.suppress(&entry).await.unwrap();
    }
    let before = h.engine.suppressions.entry_count(Isp::Yahoo);

    let mut csv = String::from("email,reason\n");
    for i in 0..90 {
        csv.push_str(&format!("user{i}@yahoo.com,imported\n"));
    }
    for i in 0..5 {
        csv.push_str(&format!("user{i}@yahoo.com,repeated\n"));
    }
    for i in 0..5 {
        csv.push_str(&format!("broken{i}.yahoo.com,no at sign\n"));
    }

    let report = h.engine.suppressions.import_csv(Isp::Yahoo, &csv).await;
    assert_eq!(report.rows, 100);
    assert_eq!(report.invalid, 5);
    assert_eq!(report.duplicates, 8);
    assert_eq!(report.imported, 95 - report.duplicates);
    assert_eq!(
        h.engine.suppressions.entry_count(Isp::Yahoo),
        before + report.imported
    );
}

#[tokio::test]
async fn test_two_triggers_make_one_hub_entry() {
    let h = in_memory().await;
    let running = h.engine.start().unwrap();
    let key = AgentKey::new(Isp::Yahoo, AgentType::Bounce);

    let logged = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%z");
    h.engine
        .ingestor
        .submit_accounting_csv(&format!(
            "b,{logged},,news@brand.example,dup@yahoo.com,,failed,5.1.1,\
             smtp;550 5.1.1 user unknown,mta5.am0.yahoodns.net,bad-mailbox\n"
        ))
        .unwrap();
    for _ in 0..100 {
        if h.engine.hub.is_suppressed("dup@yahoo.com") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.engine.hub.is_suppressed("dup@yahoo.com"));

    // A bounce storm makes the Yahoo bounce agent suppress the recipients
    // behind it, including the one the webhook already suppressed.
    h.engine.signals.record_event(Isp::Yahoo, EventKind::Delivered, 94);
    h.engine.signals.record_event(Isp::Yahoo, EventKind::Bounced, 5);
    h.engine.orchestrator.evaluate_once(key).await;

    let agent_suppressions: Vec<_> = h
        .engine
        .orchestrator
        .get_recent_decisions(10)
        .into_iter()
        .filter(|d| matches!(d.action, ActionTaken::SuppressRecipients { .. }))
        .collect();
    assert_eq!(agent_suppressions.len(), 1);
    assert!(!agent_suppressions[0].operator);
    assert_eq!(
        agent_suppressions[0].action,
        ActionTaken::SuppressRecipients {
            emails: vec!["dup@yahoo.com".to_string()]
        }
    );

    running.stop().await;

    assert_eq!(h.engine.hub.entry_count(), 1);
    let pushed = h.executor.pushes.lock().unwrap().last().cloned().unwrap();
    assert_eq!(pushed.lines().filter(|l| *l == "dup@yahoo.com").count(), 1);
    let export = h.engine.hub.export_csv().await.unwrap();
    assert_eq!(export.matches("dup@yahoo.com").count(), 1);
}

#[tokio::test]
async fn test_yahoo_bounce_storm_fires_once() {
    let h = in_memory().await;
    let key = AgentKey::new(Isp::Yahoo, AgentType::Bounce);
    h.engine.signals.record_event(Isp::Yahoo, EventKind::Delivered, 94);
    h.engine.signals.record_event(Isp::Yahoo, EventKind::Bounced, 6);

    let outcome = h.engine.orchestrator.evaluate_once(key).await;
    assert!(matches!(outcome, Evaluation::Fired(_)), "{outcome:?}");

    let decisions = h.engine.orchestrator.get_recent_decisions(10);
    assert_eq!(decisions.len(), 1);
    assert!(!decisions[0].action.kind().is_empty());
    assert_eq!(h.alerter.sent().len(), 1);
    assert_eq!(h.executor.actions.lock().unwrap().len(), 1);
    assert_eq!(
        h.engine.orchestrator.get_agent_state(key).status,
        AgentStatus::Firing
    );
}

#[tokio::test]
async fn test_decisions_and_convictions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sendguard.db");
    let path = path.to_str().unwrap();
    let key = AgentKey::new(Isp::Gmail, AgentType::Deferral);

    {
        let pool = db::connect(path).await.unwrap();
        let h = harness(pool.clone()).await;
        h.engine.signals.record_event(Isp::Gmail, EventKind::Delivered, 50);
        h.engine.signals.record_event(Isp::Gmail, EventKind::Deferred, 50);
        assert!(matches!(
            h.engine.orchestrator.evaluate_once(key).await,
            Evaluation::Fired(_)
        ));
        h.engine.convictions.flush().await;
        pool.close().await;
    }

    let h = harness(db::connect(path).await.unwrap()).await;
    assert_eq!(h.engine.decisions.len(), 1);
    assert_eq!(h.engine.convictions.stats(Isp::Gmail, AgentType::Deferral).will, 1);
    assert_eq!(
        h.engine.orchestrator.get_agent_state(key).status,
        AgentStatus::Firing
    );
}

fn key_strategy() -> impl Strategy<Value = AgentKey> {
    (0..Isp::ALL.len(), 0..AgentType::ALL.len())
        .prop_map(|(i, t)| AgentKey::new(Isp::ALL[i], AgentType::ALL[t]))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_recall_never_leaks_and_stats_add_up(
        recorded in prop::collection::vec((key_strategy(), any::<bool>(), 0.0f64..0.2), 0..40),
        query in key_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let memory = Arc::new(MemoryStore::new(db::in_memory().await.unwrap()).await.unwrap());
            let store = ConvictionStore::new(memory, 8);
            for (key, will, bounce) in &recorded {
                let context = MicroContext { bounce_rate: *bounce, ..MicroContext::default() };
                let verdict = if *will { Verdict::Will } else { Verdict::Wont };
                store.record(Conviction::new(*key, verdict, context, 0.7));
            }

            let recalled = store.recall_similar(
                query.isp,
                query.agent_type,
                &MicroContext::default(),
                usize::MAX,
            );
            prop_assert!(recalled.iter().all(|m| m.conviction.key() == query));

            let stats = store.stats(query.isp, query.agent_type);
            let all = store.recall_recent(query.isp, query.agent_type, None);
            prop_assert_eq!(stats.will + stats.wont, all.len());
            prop_assert_eq!(all.len(), recorded.iter().filter(|(k, _, _)| *k == query).count());
            Ok(())
        })?;
    }
}
