//! Suppression storage repository.

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{Scope, Suppression, SuppressionSource, SuppressionStats, normalize_email};
use crate::Result;

/// Repository for every suppression list, global and per ISP.
pub struct SuppressionRepository {
    pool: SqlitePool,
}

impl SuppressionRepository {
    /// Creates the repository, creating its table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS suppressions (
                scope TEXT NOT NULL,
                email TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                dsn_code TEXT,
                source_ip TEXT,
                campaign_id TEXT,
                source TEXT NOT NULL,
                suppressed_at TEXT NOT NULL,
                PRIMARY KEY (scope, email)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_suppressions_time ON suppressions(scope, suppressed_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts an entry unless (scope, email) already exists.
    ///
    /// Returns true if the entry is new. An existing entry is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert(&self, entry: &Suppression) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO suppressions
                (scope, email, reason, dsn_code, source_ip, campaign_id, source, suppressed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope, email) DO NOTHING
            ",
        )
        .bind(entry.scope.as_str())
        .bind(&entry.email)
        .bind(&entry.reason)
        .bind(&entry.dsn_code)
        .bind(&entry.source_ip)
        .bind(&entry.campaign_id)
        .bind(entry.source.as_str())
        .bind(entry.suppressed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Gets one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, scope: Scope, email: &str) -> Result<Option<Suppression>> {
        let row = sqlx::query(
            r"
            SELECT scope, email, reason, dsn_code, source_ip, campaign_id, source, suppressed_at
            FROM suppressions
            WHERE scope = ? AND email = ?
            ",
        )
        .bind(scope.as_str())
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_suppression))
    }

    /// Lists a page of entries, newest first, optionally filtered by a
    /// substring of the address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(
        &self,
        scope: Scope,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Suppression>> {
        let pattern = format!("%{}%", search.map(normalize_email).unwrap_or_default());
        let rows = sqlx::query(
            r"
            SELECT scope, email, reason, dsn_code, source_ip, campaign_id, source, suppressed_at
            FROM suppressions
            WHERE scope = ? AND email LIKE ?
            ORDER BY suppressed_at DESC, email ASC
            LIMIT ? OFFSET ?
            ",
        )
        .bind(scope.as_str())
        .bind(pattern)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_suppression).collect())
    }

    /// Returns every entry of a list, ordered by address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn all(&self, scope: Scope) -> Result<Vec<Suppression>> {
        let rows = sqlx::query(
            r"
            SELECT scope, email, reason, dsn_code, source_ip, campaign_id, source, suppressed_at
            FROM suppressions
            WHERE scope = ?
            ORDER BY email ASC
            ",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_suppression).collect())
    }

    /// Returns every (scope, email) pair, for building in-memory indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn keys(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT scope, email FROM suppressions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| (r.get("scope"), r.get("email"))).collect())
    }

    /// Summarizes one list.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn stats(&self, scope: Scope) -> Result<SuppressionStats> {
        let rows = sqlx::query(
            r"
            SELECT source, COUNT(*) AS n, MAX(suppressed_at) AS latest
            FROM suppressions
            WHERE scope = ?
            GROUP BY source
            ",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = SuppressionStats::default();
        for row in &rows {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            let n = u64::try_from(n).unwrap_or(0);
            stats.total += n;
            *stats.by_source.entry(source).or_default() += n;

            let latest: Option<String> = row.get("latest");
            let latest = latest.as_deref().and_then(parse_time);
            stats.latest = stats.latest.max(latest);
        }

        let since = (Utc::now() - TimeDelta::hours(24)).to_rfc3339();
        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM suppressions WHERE scope = ? AND suppressed_at >= ?",
        )
        .bind(scope.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        stats.last_24h = u64::try_from(recent).unwrap_or(0);

        Ok(stats)
    }

    /// Deletes one entry. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove(&self, scope: Scope, email: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM suppressions WHERE scope = ? AND email = ?")
            .bind(scope.as_str())
            .bind(normalize_email(email))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_suppression(row: &SqliteRow) -> Option<Suppression> {
    let scope: String = row.get("scope");
    let source: String = row.get("source");
    let suppressed_at: String = row.get("suppressed_at");

    Some(Suppression {
        email: row.get("email"),
        scope: Scope::parse(&scope).ok()?,
        reason: row.get("reason"),
        dsn_code: row.get("dsn_code"),
        source_ip: row.get("source_ip"),
        campaign_id: row.get("campaign_id"),
        source: SuppressionSource::parse(&source),
        suppressed_at: parse_time(&suppressed_at)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;
    use crate::isp::Isp;

    async fn repo() -> SuppressionRepository {
        SuppressionRepository::new(db::in_memory().await.unwrap()).await.unwrap()
    }

    fn entry(email: &str, scope: Scope) -> Suppression {
        Suppression::new(email, scope, SuppressionSource::HardBounce, "5.1.1 user unknown")
            .with_dsn_code(Some("5.1.1".to_string()))
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let repo = repo().await;
        let yahoo = Scope::Isp(Isp::Yahoo);

        assert!(repo.insert(&entry("a@yahoo.com", yahoo)).await.unwrap());
        assert!(!repo.insert(&entry("a@yahoo.com", yahoo)).await.unwrap());
        assert!(repo.insert(&entry("a@yahoo.com", Scope::Global)).await.unwrap());

        assert_eq!(repo.all(yahoo).await.unwrap().len(), 1);
        let got = repo.get(yahoo, "A@Yahoo.com").await.unwrap().unwrap();
        assert_eq!(got.dsn_code.as_deref(), Some("5.1.1"));
    }

    #[tokio::test]
    async fn test_list_search_and_paging() {
        let repo = repo().await;
        for email in ["alice@gmail.com", "bob@gmail.com", "alicia@gmail.com"] {
            repo.insert(&entry(email, Scope::Isp(Isp::Gmail))).await.unwrap();
        }

        let found = repo.list(Scope::Isp(Isp::Gmail), Some("ALI"), 10, 0).await.unwrap();
        assert_eq!(found.len(), 2);
        let page = repo.list(Scope::Isp(Isp::Gmail), None, 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_remove() {
        let repo = repo().await;
        let scope = Scope::Isp(Isp::Cox);
        repo.insert(&entry("a@cox.net", scope)).await.unwrap();
        repo.insert(&Suppression::new("b@cox.net", scope, SuppressionSource::Import, ""))
            .await
            .unwrap();

        let stats = repo.stats(scope).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.last_24h, 2);
        assert_eq!(stats.by_source.get("hard_bounce"), Some(&1));
        assert!(stats.latest.is_some());

        assert!(repo.remove(scope, "a@cox.net").await.unwrap());
        assert!(!repo.remove(scope, "a@cox.net").await.unwrap());
    }
}
