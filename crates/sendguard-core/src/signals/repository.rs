//! Durable hourly signal counters.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::{Counts, EventKind};
use crate::isp::Isp;
use crate::Result;

/// Repository for hour-bucketed event counters.
pub struct SignalRepository {
    pool: SqlitePool,
}

impl SignalRepository {
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
            CREATE TABLE IF NOT EXISTS signal_counters (
                isp TEXT NOT NULL,
                kind TEXT NOT NULL,
                hour TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (isp, kind, hour)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Truncates a timestamp to the start of its hour.
    #[must_use]
    pub fn hour_of(at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
    }

    /// Adds `delta` to one hourly counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn increment(
        &self,
        isp: Isp,
        kind: EventKind,
        hour: DateTime<Utc>,
        delta: u64,
    ) -> Result<()> {
        let delta = i64::try_from(delta).unwrap_or(i64::MAX);
        sqlx::query(
            r"
            INSERT INTO signal_counters (isp, kind, hour, count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(isp, kind, hour) DO UPDATE SET
                count = count + excluded.count
            ",
        )
        .bind(isp.as_str())
        .bind(kind.as_str())
        .bind(Self::hour_of(hour).to_rfc3339())
        .bind(delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sums every counter for `isp` from the hour containing `since` onward.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn totals(&self, isp: Isp, since: DateTime<Utc>) -> Result<Counts> {
        let rows = sqlx::query(
            r"
            SELECT kind, SUM(count) AS total
            FROM signal_counters
            WHERE isp = ? AND hour >= ?
            GROUP BY kind
            ",
        )
        .bind(isp.as_str())
        .bind(Self::hour_of(since).to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Counts::default();
        for row in &rows {
            let kind: String = row.get("kind");
            let total: i64 = row.get("total");
            if let Some(kind) = EventKind::parse(&kind) {
                counts.add(kind, u64::try_from(total).unwrap_or(0));
            }
        }
        Ok(counts)
    }

    /// Deletes counters for hours before `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM signal_counters WHERE hour < ?")
            .bind(Self::hour_of(before).to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_increment_and_totals() {
        let repo = SignalRepository::new(db::in_memory().await.unwrap()).await.unwrap();
        let now = Utc::now();

        repo.increment(Isp::Yahoo, EventKind::Delivered, now, 90).await.unwrap();
        repo.increment(Isp::Yahoo, EventKind::Delivered, now, 4).await.unwrap();
        repo.increment(Isp::Yahoo, EventKind::Bounced, now, 6).await.unwrap();
        repo.increment(Isp::Gmail, EventKind::Bounced, now, 50).await.unwrap();

        let totals = repo.totals(Isp::Yahoo, now - TimeDelta::hours(1)).await.unwrap();
        assert_eq!(totals.delivered, 94);
        assert_eq!(totals.bounced, 6);
    }

    #[tokio::test]
    async fn test_prune() {
        let repo = SignalRepository::new(db::in_memory().await.unwrap()).await.unwrap();
        let old = Utc::now() - TimeDelta::days(3);
        repo.increment(Isp::Cox, EventKind::Sent, old, 1).await.unwrap();
        repo.increment(Isp::Cox, EventKind::Sent, Utc::now(), 1).await.unwrap();

        assert_eq!(repo.prune(Utc::now() - TimeDelta::days(1)).await.unwrap(), 1);
    }
}
