//! Per-ISP suppression store with an in-memory membership index.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::csv;
use super::model::{
    ImportReport, Scope, Suppression, SuppressionSource, SuppressionStats, normalize_email,
};
use super::repository::SuppressionRepository;
use crate::isp::Isp;
use crate::sync::{read, write};
use crate::{Error, Result};

/// Receives every newly created suppression.
#[async_trait]
pub trait SuppressionSink: Send + Sync {
    /// Called once per new entry, after it is stored.
    ///
    /// # Errors
    ///
    /// An error makes the store undo the entry and fail the suppression.
    async fn on_suppressed(&self, entry: &Suppression) -> Result<()>;
}

/// Durable per-ISP lists with O(1) membership checks.
pub struct SuppressionStore {
    repo: Arc<SuppressionRepository>,
    index: HashMap<Isp, RwLock<HashSet<String>>>,
    sink: Option<Arc<dyn SuppressionSink>>,
}

impl SuppressionStore {
    /// Creates a store. New entries are forwarded to `sink`.
    #[must_use]
    pub fn new(repo: Arc<SuppressionRepository>, sink: Option<Arc<dyn SuppressionSink>>) -> Self {
        Self {
            repo,
            index: Isp::ALL
                .into_iter()
                .map(|isp| (isp, RwLock::new(HashSet::new())))
                .collect(),
            sink,
        }
    }

    fn slot(&self, isp: Isp) -> &RwLock<HashSet<String>> {
        // Every ISP is inserted at construction.
        &self.index[&isp]
    }

    /// Builds the membership index from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub async fn load(&self) -> Result<usize> {
        let mut by_isp: HashMap<Isp, HashSet<String>> = HashMap::new();
        for (scope, email) in self.repo.keys().await? {
            if let Ok(Scope::Isp(isp)) = Scope::parse(&scope) {
                by_isp.entry(isp).or_default().insert(email);
            }
        }

        let mut loaded = 0;
        for isp in Isp::ALL {
            let emails = by_isp.remove(&isp).unwrap_or_default();
            loaded += emails.len();
            *write(self.slot(isp)) = emails;
        }

        info!(loaded, "Per-ISP suppressions loaded");
        Ok(loaded)
    }

    /// Returns true if `email` is suppressed for `isp`.
    #[must_use]
    pub fn is_suppressed(&self, isp: Isp, email: &str) -> bool {
        read(self.slot(isp)).contains(&normalize_email(email))
    }

    /// Number of entries for `isp`.
    #[must_use]
    pub fn entry_count(&self, isp: Isp) -> usize {
        read(self.slot(isp)).len()
    }

    /// Suppresses an address for one ISP.
    ///
    /// Returns true if the entry is new. Re-suppressing is a no-op that
    /// returns false and does not notify the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is not ISP-scoped, storage fails, or the
    /// sink rejects the entry. A rejected entry is removed again so a retry
    /// reaches the sink.
    pub async fn suppress(&self, entry: &Suppression) -> Result<bool> {
        let Scope::Isp(isp) = entry.scope else {
            return Err(Error::InvalidInput(
                "per-ISP store only accepts ISP-scoped entries".to_string(),
            ));
        };
        if self.is_suppressed(isp, &entry.email) {
            return Ok(false);
        }

        let was_new = self.repo.insert(entry).await?;
        if was_new
            && let Some(sink) = &self.sink
            && let Err(e) = sink.on_suppressed(entry).await
        {
            warn!(%isp, email = %entry.email, error = %e, "Sink rejected suppression, rolling back");
            self.repo.remove(Scope::Isp(isp), &entry.email).await?;
            write(self.slot(isp)).remove(&entry.email);
            return Err(e);
        }

        write(self.slot(isp)).insert(entry.email.clone());
        if was_new {
            debug!(%isp, email = %entry.email, source = %entry.source, "Suppressed");
        }
        Ok(was_new)
    }

    /// Removes an entry. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn remove(&self, isp: Isp, email: &str) -> Result<bool> {
        let removed = self.repo.remove(Scope::Isp(isp), email).await?;
        write(self.slot(isp)).remove(&normalize_email(email));
        Ok(removed)
    }

    /// Lists a page of entries for `isp`, newest first.
    ///
    /// Storage errors are logged and yield an empty page.
    pub async fn list_by_isp(
        &self,
        isp: Isp,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Vec<Suppression> {
        self.repo
            .list(Scope::Isp(isp), search, limit, offset)
            .await
            .unwrap_or_else(|e| {
                warn!(%isp, error = %e, "Failed to list suppressions");
                Vec::new()
            })
    }

    /// Summarizes the list for `isp`.
    ///
    /// Storage errors are logged and yield empty stats.
    pub async fn get_stats(&self, isp: Isp) -> SuppressionStats {
        self.repo
            .stats(Scope::Isp(isp))
            .await
            .unwrap_or_else(|e| {
                warn!(%isp, error = %e, "Failed to read suppression stats");
                SuppressionStats::default()
            })
    }

    /// Imports CSV rows into the list for `isp`.
    ///
    /// Invalid rows and rows that fail to store are counted and skipped; the
    /// rest of the batch continues.
    pub async fn import_csv(&self, isp: Isp, text: &str) -> ImportReport {
        let mut report = ImportReport::default();

        for row in csv::parse(text) {
            report.rows += 1;
            let row = match row {
                Ok(row) => row,
                Err(reason) => {
                    debug!(%isp, reason = %reason, "Skipping invalid import row");
                    report.invalid += 1;
                    continue;
                }
            };

            let mut entry = Suppression::new(
                &row.email,
                Scope::Isp(isp),
                SuppressionSource::Import,
                row.reason.unwrap_or_else(|| "imported".to_string()),
            )
            .with_dsn_code(row.dsn_code)
            .with_source_ip(row.source_ip)
            .with_campaign_id(row.campaign_id);
            if let Some(at) = row.suppressed_at {
                entry.suppressed_at = at;
            }

            match self.suppress(&entry).await {
                Ok(true) => report.imported += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!(%isp, email = %entry.email, error = %e, "Failed to import row");
                    report.failed += 1;
                }
            }
        }

        info!(
            %isp,
            imported = report.imported,
            duplicates = report.duplicates,
            invalid = report.invalid,
            failed = report.failed,
            "Suppression import finished"
        );
        report
    }

    /// Exports the list for `isp` as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn export_csv(&self, isp: Isp) -> Result<String> {
        let entries = self.repo.all(Scope::Isp(isp)).await?;
        Ok(csv::export(&entries))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink(Mutex<Vec<String>>);

    #[async_trait]
    impl SuppressionSink for CountingSink {
        async fn on_suppressed(&self, entry: &Suppression) -> Result<()> {
            self.0.lock().unwrap().push(entry.email.clone());
            Ok(())
        }
    }

    /// Rejects the first entry it sees, then accepts.
    #[derive(Default)]
    struct FlakySink {
        rejected: std::sync::atomic::AtomicBool,
        accepted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SuppressionSink for FlakySink {
        async fn on_suppressed(&self, entry: &Suppression) -> Result<()> {
            if !self.rejected.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Config("hub unavailable".to_string()));
            }
            self.accepted.lock().unwrap().push(entry.email.clone());
            Ok(())
        }
    }

    async fn store(sink: Option<Arc<dyn SuppressionSink>>) -> SuppressionStore {
        let repo = SuppressionRepository::new(db::in_memory().await.unwrap()).await.unwrap();
        SuppressionStore::new(Arc::new(repo), sink)
    }

    fn entry(email: &str) -> Suppression {
        Suppression::new(email, Scope::Isp(Isp::Yahoo), SuppressionSource::Agent, "bounce storm")
    }

    #[tokio::test]
    async fn test_suppress_twice_notifies_once() {
        let sink = Arc::new(CountingSink::default());
        let store = store(Some(sink.clone())).await;

        assert!(store.suppress(&entry("x@yahoo.com")).await.unwrap());
        assert!(!store.suppress(&entry("X@yahoo.com")).await.unwrap());

        assert!(store.is_suppressed(Isp::Yahoo, "x@YAHOO.com"));
        assert!(!store.is_suppressed(Isp::Gmail, "x@yahoo.com"));
        assert_eq!(store.entry_count(Isp::Yahoo), 1);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_rolls_back_entry() {
        let sink = Arc::new(FlakySink::default());
        let store = store(Some(sink.clone())).await;

        assert!(store.suppress(&entry("retry@yahoo.com")).await.is_err());
        assert!(!store.is_suppressed(Isp::Yahoo, "retry@yahoo.com"));
        assert_eq!(store.get_stats(Isp::Yahoo).await.total, 0);

        assert!(store.suppress(&entry("retry@yahoo.com")).await.unwrap());
        assert!(store.is_suppressed(Isp::Yahoo, "retry@yahoo.com"));
        assert_eq!(*sink.accepted.lock().unwrap(), vec!["retry@yahoo.com"]);
    }

    #[tokio::test]
    async fn test_rejects_global_scope() {
        let store = store(None).await;
        let global = entry("x@yahoo.com").rescoped(Scope::Global);
        assert!(store.suppress(&global).await.is_err());
    }

    #[tokio::test]
    async fn test_import_counts() {
        let store = store(None).await;
        store.suppress(&entry("dup@yahoo.com")).await.unwrap();

        let report = store
            .import_csv(
                Isp::Yahoo,
                "email,reason\nnew@yahoo.com,a\ndup@yahoo.com,b\nbroken,c\nnew@yahoo.com,d\n",
            )
            .await;

        assert_eq!(report.rows, 4);
        assert_eq!(report.imported, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(store.entry_count(Isp::Yahoo), 2);
    }

    #[tokio::test]
    async fn test_remove_and_export() {
        let store = store(None).await;
        store.suppress(&entry("a@yahoo.com")).await.unwrap();
        store.suppress(&entry("b@yahoo.com")).await.unwrap();
        assert!(store.remove(Isp::Yahoo, "A@yahoo.com").await.unwrap());
        assert!(!store.is_suppressed(Isp::Yahoo, "a@yahoo.com"));

        let csv = store.export_csv(Isp::Yahoo).await.unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("b@yahoo.com"));
        assert_eq!(store.list_by_isp(Isp::Yahoo, None, 10, 0).await.len(), 1);
    }
}
