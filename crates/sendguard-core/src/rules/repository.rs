//! Rule and ISP configuration storage.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::warn;

use super::model::{Comparison, IspConfig, Metric, NewRule, Rule};
use crate::isp::{AgentType, Isp};
use crate::Result;

/// Repository for rules and ISP configurations.
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    /// Creates the repository, creating its tables if needed.
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
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                isp TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                metric TEXT NOT NULL,
                comparison TEXT NOT NULL,
                threshold REAL NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS isp_configs (
                isp TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists every rule, oldest first. Unreadable rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query("SELECT * FROM rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(row_to_rule).collect())
    }

    /// Inserts a rule and returns it with its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert(&self, rule: &NewRule) -> Result<Rule> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r"
            INSERT INTO rules (isp, agent_type, metric, comparison, threshold, enabled, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(rule.isp.as_str())
        .bind(rule.agent_type.as_str())
        .bind(rule.metric.as_str())
        .bind(rule.comparison.as_str())
        .bind(rule.threshold)
        .bind(rule.enabled)
        .bind(&rule.description)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Rule {
            id: result.last_insert_rowid(),
            isp: rule.isp,
            agent_type: rule.agent_type,
            metric: rule.metric,
            comparison: rule.comparison,
            threshold: rule.threshold,
            enabled: rule.enabled,
            description: rule.description.clone(),
            created_at,
        })
    }

    /// Replaces a rule's fields. Returns false if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update(&self, id: i64, rule: &NewRule) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE rules SET
                isp = ?, agent_type = ?, metric = ?, comparison = ?,
                threshold = ?, enabled = ?, description = ?
            WHERE id = ?
            ",
        )
        .bind(rule.isp.as_str())
        .bind(rule.agent_type.as_str())
        .bind(rule.metric.as_str())
        .bind(rule.comparison.as_str())
        .bind(rule.threshold)
        .bind(rule.enabled)
        .bind(&rule.description)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a rule. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists stored ISP configurations. Unreadable rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn isp_configs(&self) -> Result<Vec<IspConfig>> {
        let rows = sqlx::query("SELECT isp, config FROM isp_configs")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let isp: String = row.get("isp");
                let config: String = row.get("config");
                serde_json::from_str(&config)
                    .map_err(|e| warn!(isp = %isp, error = %e, "Skipping unreadable ISP config"))
                    .ok()
            })
            .collect())
    }

    /// Stores an ISP configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database query fails.
    pub async fn save_isp_config(&self, config: &IspConfig) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO isp_configs (isp, config, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(isp) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at
            ",
        )
        .bind(config.isp.as_str())
        .bind(serde_json::to_string(config)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_rule(row: &SqliteRow) -> Option<Rule> {
    let id: i64 = row.get("id");
    let isp: String = row.get("isp");
    let agent_type: String = row.get("agent_type");
    let metric: String = row.get("metric");
    let comparison: String = row.get("comparison");
    let created_at: String = row.get("created_at");

    let parsed = (|| -> Result<Rule> {
        Ok(Rule {
            id,
            isp: Isp::parse(&isp)?,
            agent_type: AgentType::parse(&agent_type)?,
            metric: Metric::parse(&metric)?,
            comparison: Comparison::parse(&comparison)?,
            threshold: row.get("threshold"),
            enabled: row.get::<i64, _>("enabled") != 0,
            description: row.get("description"),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
        })
    })();

    parsed
        .map_err(|e| warn!(rule_id = id, error = %e, "Skipping unreadable rule"))
        .ok()
}
