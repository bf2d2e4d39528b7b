//! Global suppression hub: the single list every send path consults.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, error, info, warn};

use super::csv;
use super::model::{Scope, Suppression, SuppressionStats, normalize_email};
use super::repository::SuppressionRepository;
use super::store::SuppressionSink;
use crate::Result;
use crate::executor::Executor;
use crate::settings::SuppressionSettings;
use crate::sync::{read, write};

/// Result of pushing the list to the transfer agent.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Addresses in the pushed file.
    pub entries: usize,
    /// Remote path written.
    pub remote_path: String,
    /// When the push completed.
    pub at: DateTime<Utc>,
}

/// Canonical, idempotent global suppression list.
///
/// Every trigger in the engine ends up here, either directly or through the
/// per-ISP store's sink. Writes mark the list dirty and wake the sync task,
/// which coalesces bursts into one push.
pub struct SuppressionHub {
    repo: Arc<SuppressionRepository>,
    index: RwLock<HashSet<String>>,
    executor: Arc<dyn Executor>,
    settings: SuppressionSettings,
    dirty: AtomicBool,
    wake: Notify,
    sync_lock: Mutex<()>,
    last_sync: RwLock<Option<SyncReport>>,
}

impl SuppressionHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new(
        repo: Arc<SuppressionRepository>,
        executor: Arc<dyn Executor>,
        settings: SuppressionSettings,
    ) -> Self {
        Self {
            repo,
            index: RwLock::new(HashSet::new()),
            executor,
            settings,
            dirty: AtomicBool::new(false),
            wake: Notify::new(),
            sync_lock: Mutex::new(()),
            last_sync: RwLock::new(None),
        }
    }

    /// Loads the global list from storage.
    ///
    /// Per-ISP entries missing from the global list are copied into it
    /// first, so an entry stored just before a crash still reaches the
    /// hub. The loaded list is marked dirty so the first sync pushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or a missing entry cannot
    /// be copied.
    pub async fn load(&self) -> Result<usize> {
        let keys = self.repo.keys().await?;
        let mut emails: HashSet<String> = keys
            .iter()
            .filter(|(scope, _)| scope == Scope::Global.as_str())
            .map(|(_, email)| email.clone())
            .collect();

        let mut repaired = 0;
        for (scope, email) in &keys {
            if emails.contains(email) {
                continue;
            }
            let Ok(scope) = Scope::parse(scope) else {
                warn!(scope = %scope, email = %email, "Skipping suppression with unknown scope");
                continue;
            };
            if let Some(entry) = self.repo.get(scope, email).await? {
                self.repo.insert(&entry.rescoped(Scope::Global)).await?;
                emails.insert(entry.email);
                repaired += 1;
            }
        }
        if repaired > 0 {
            warn!(repaired, "Copied per-ISP suppressions missing from the global list");
        }

        let loaded = emails.len();
        *write(&self.index) = emails;
        self.mark_dirty();
        info!(loaded, "Global suppressions loaded");
        Ok(loaded)
    }

    /// Returns true if mail may be sent to `email`.
    #[must_use]
    pub fn check_send(&self, email: &str) -> bool {
        !self.is_suppressed(email)
    }

    /// Returns true if `email` is on the global list.
    #[must_use]
    pub fn is_suppressed(&self, email: &str) -> bool {
        read(&self.index).contains(&normalize_email(email))
    }

    /// Number of addresses on the global list.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        read(&self.index).len()
    }

    /// Adds an entry to the global list, whatever its original scope.
    ///
    /// Returns true if the address is new; re-suppressing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn suppress(&self, entry: &Suppression) -> Result<bool> {
        if self.is_suppressed(&entry.email) {
            return Ok(false);
        }

        let global = entry.rescoped(Scope::Global);
        let was_new = self.repo.insert(&global).await?;
        write(&self.index).insert(global.email.clone());

        if was_new {
            debug!(email = %global.email, source = %global.source, "Globally suppressed");
            self.mark_dirty();
        }
        Ok(was_new)
    }

    /// Removes an address from the global list.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn remove(&self, email: &str) -> Result<bool> {
        let removed = self.repo.remove(Scope::Global, email).await?;
        let was_indexed = write(&self.index).remove(&normalize_email(email));
        if removed || was_indexed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Lists a page of global entries, newest first. Storage errors yield an
    /// empty page.
    pub async fn list(&self, search: Option<&str>, limit: u32, offset: u32) -> Vec<Suppression> {
        self.repo
            .list(Scope::Global, search, limit, offset)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list global suppressions");
                Vec::new()
            })
    }

    /// Summarizes the global list. Storage errors yield empty stats.
    pub async fn stats(&self) -> SuppressionStats {
        self.repo.stats(Scope::Global).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read global suppression stats");
            SuppressionStats::default()
        })
    }

    /// Exports the global list as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn export_csv(&self) -> Result<String> {
        Ok(csv::export(&self.repo.all(Scope::Global).await?))
    }

    /// Renders the transfer-agent suppression file: a `#` comment line, then
    /// one address per line, sorted.
    #[must_use]
    pub fn render_list(&self) -> String {
        let mut emails: Vec<String> = read(&self.index).iter().cloned().collect();
        emails.sort_unstable();

        let mut out = format!(
            "# sendguard global suppression list: {} addresses, generated {}\n",
            emails.len(),
            Utc::now().to_rfc3339()
        );
        for email in emails {
            out.push_str(&email);
            out.push('\n');
        }
        out
    }

    /// Returns true if the list changed since the last successful sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Last successful sync.
    #[must_use]
    pub fn last_sync(&self) -> Option<SyncReport> {
        read(&self.last_sync).clone()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Writes the list locally (if configured) and pushes it to the host.
    ///
    /// On failure the list stays dirty and the next sync retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the local write or the remote push fails.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        self.dirty.store(false, Ordering::Release);

        let contents = self.render_list();
        let entries = contents.lines().filter(|l| !l.starts_with('#')).count();

        let result = async {
            if let Some(path) = &self.settings.local_path {
                write_atomic(path, &contents).await?;
            }
            self.executor
                .push_file(&self.settings.remote_path, &contents)
                .await
        }
        .await;

        if let Err(e) = result {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        let report = SyncReport {
            entries,
            remote_path: self.settings.remote_path.clone(),
            at: Utc::now(),
        };
        info!(entries, remote_path = %report.remote_path, "Global suppression list synced");
        *write(&self.last_sync) = Some(report.clone());
        Ok(report)
    }

    async fn sync_if_dirty(&self) {
        if self.is_dirty()
            && let Err(e) = self.sync_now().await
        {
            error!(error = %e, "Global suppression sync failed");
        }
    }

    /// Runs the sync task until `shutdown` flips to true, then syncs once
    /// more if anything is pending.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.settings.sync_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.wake.notified() => self.sync_if_dirty().await,
                _ = interval.tick() => self.sync_if_dirty().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.sync_if_dirty().await;
        debug!("Suppression sync task stopped");
    }
}

#[async_trait]
impl SuppressionSink for SuppressionHub {
    async fn on_suppressed(&self, entry: &Suppression) -> Result<()> {
        self.suppress(entry).await.map(|_| ()).inspect_err(|e| {
            error!(email = %entry.email, error = %e, "Failed to forward suppression to hub");
        })
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;
    use crate::executor::DryRunExecutor;
    use crate::isp::Isp;
    use crate::settings::CommandTemplates;
    use crate::suppression::{SuppressionSource, SuppressionStore};

    async fn hub(local: Option<PathBuf>) -> (Arc<SuppressionHub>, Arc<DryRunExecutor>, Arc<SuppressionRepository>) {
        let repo = Arc::new(SuppressionRepository::new(db::in_memory().await.unwrap()).await.unwrap());
        let executor = Arc::new(DryRunExecutor::new(CommandTemplates::default()));
        let settings = SuppressionSettings {
            local_path: local,
            ..SuppressionSettings::default()
        };
        let hub = Arc::new(SuppressionHub::new(Arc::clone(&repo), executor.clone(), settings));
        (hub, executor, repo)
    }

    #[tokio::test]
    async fn test_suppress_is_idempotent_and_global() {
        let (hub, _, _) = hub(None).await;
        let entry = Suppression::new(
            "User@Yahoo.com",
            Scope::Isp(Isp::Yahoo),
            SuppressionSource::HardBounce,
            "5.1.1",
        );

        assert!(hub.suppress(&entry).await.unwrap());
        assert!(!hub.suppress(&entry).await.unwrap());
        assert_eq!(hub.entry_count(), 1);
        assert!(!hub.check_send("user@yahoo.com"));
        assert!(hub.check_send("other@yahoo.com"));
        assert_eq!(hub.list(None, 10, 0).await[0].scope, Scope::Global);
    }

    #[tokio::test]
    async fn test_store_entries_reach_hub_once() {
        let (hub, _, repo) = hub(None).await;
        let store = SuppressionStore::new(repo, Some(hub.clone() as Arc<dyn SuppressionSink>));

        let bounce = Suppression::new("a@gmail.com", Scope::Isp(Isp::Gmail), SuppressionSource::HardBounce, "bounce");
        let complaint = Suppression::new("a@gmail.com", Scope::Isp(Isp::Yahoo), SuppressionSource::Complaint, "fbl");
        store.suppress(&bounce).await.unwrap();
        store.suppress(&complaint).await.unwrap();
        hub.suppress(&Suppression::new("a@gmail.com", Scope::Global, SuppressionSource::Agent, "agent"))
            .await
            .unwrap();

        assert_eq!(hub.entry_count(), 1);
        let list = hub.render_list();
        assert_eq!(list.lines().filter(|l| *l == "a@gmail.com").count(), 1);
    }

    #[tokio::test]
    async fn test_render_list_sorted_with_header() {
        let (hub, _, _) = hub(None).await;
        for email in ["c@x.com", "a@x.com", "b@x.com"] {
            hub.suppress(&Suppression::new(email, Scope::Global, SuppressionSource::Operator, ""))
                .await
                .unwrap();
        }
        let list = hub.render_list();
        let lines: Vec<&str> = list.lines().collect();
        assert!(lines[0].starts_with('#'));
        assert_eq!(&lines[1..], ["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn test_sync_writes_file_and_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pmta").join("global.txt");
        let (hub, executor, _) = hub(Some(path.clone())).await;

        hub.suppress(&Suppression::new("x@y.com", Scope::Global, SuppressionSource::Unsubscribe, ""))
            .await
            .unwrap();
        assert!(hub.is_dirty());

        let report = hub.sync_now().await.unwrap();
        assert_eq!(report.entries, 1);
        assert!(!hub.is_dirty());
        assert!(std::fs::read_to_string(&path).unwrap().contains("x@y.com\n"));
        assert_eq!(executor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_reload() {
        let (hub, _, repo) = hub(None).await;
        hub.suppress(&Suppression::new("keep@x.com", Scope::Global, SuppressionSource::Operator, ""))
            .await
            .unwrap();
        hub.suppress(&Suppression::new("drop@x.com", Scope::Global, SuppressionSource::Operator, ""))
            .await
            .unwrap();
        assert!(hub.remove("DROP@x.com").await.unwrap());

        let executor = Arc::new(DryRunExecutor::new(CommandTemplates::default()));
        let reloaded = SuppressionHub::new(repo, executor, SuppressionSettings::default());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert!(reloaded.is_suppressed("keep@x.com"));
        assert!(reloaded.is_dirty());
    }

    #[tokio::test]
    async fn test_load_copies_per_isp_entries_missing_from_global() {
        let (_, _, repo) = hub(None).await;
        // Stored per-ISP, never forwarded.
        let orphan = Suppression::new(
            "crash@yahoo.com",
            Scope::Isp(Isp::Yahoo),
            SuppressionSource::HardBounce,
            "5.1.1",
        );
        assert!(repo.insert(&orphan).await.unwrap());
        repo.insert(&orphan.rescoped(Scope::Isp(Isp::Gmail))).await.unwrap();

        let executor = Arc::new(DryRunExecutor::new(CommandTemplates::default()));
        let reloaded = Arc::new(SuppressionHub::new(
            Arc::clone(&repo),
            executor,
            SuppressionSettings::default(),
        ));
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert!(!reloaded.check_send("crash@yahoo.com"));
        assert!(reloaded.render_list().contains("crash@yahoo.com\n"));
        assert_eq!(reloaded.stats().await.total, 1);

        let store = SuppressionStore::new(repo, Some(reloaded.clone() as Arc<dyn SuppressionSink>));
        store.load().await.unwrap();
        assert!(!store.suppress(&orphan).await.unwrap());
        assert_eq!(reloaded.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_run_performs_final_sync_on_shutdown() {
        let (hub, executor, _) = hub(None).await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&hub).run(rx));

        hub.suppress(&Suppression::new("late@x.com", Scope::Global, SuppressionSource::Operator, ""))
            .await
            .unwrap();
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(!hub.is_dirty());
        assert!(!executor.history().is_empty());
    }
}
