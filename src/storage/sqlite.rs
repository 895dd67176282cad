//! SQLite storage backend implementation.
//!
//! Embedded database, WAL mode for read concurrency during tick writes,
//! connection pooling and automatic schema versioning with sqlx. Suitable
//! for a single-node deployment watching tens of assets; swap the backend
//! for anything larger.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, AssetRow, MetricRow, NewAlert};
use crate::asset::Chain;
use crate::catalog::{MetricName, Operator, Severity, ThresholdRule};
use crate::MetricSample;

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (creating if missing) the database file and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {db_path}");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

fn metric_row(row: &SqliteRow) -> StorageResult<MetricRow> {
    let metric_name: String = row.try_get("metric_name")?;
    let metric = MetricName::from_str(&metric_name).map_err(StorageError::SerializationError)?;

    let chain: Option<String> = row.try_get("chain")?;
    let chain = chain
        .map(|c| Chain::from_str(&c))
        .transpose()
        .map_err(StorageError::SerializationError)?;

    let metadata: Option<String> = row.try_get("metadata")?;
    let metadata = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    Ok(MetricRow {
        id: row.try_get("id")?,
        asset_symbol: row.try_get("asset_symbol")?,
        metric,
        value: row.try_get("value")?,
        chain,
        metadata,
        recorded_at: SqliteBackend::from_millis(row.try_get("recorded_at")?),
    })
}

fn alert_row(row: &SqliteRow) -> StorageResult<AlertRow> {
    let metric_name: String = row.try_get("metric_name")?;
    let metric = MetricName::from_str(&metric_name).map_err(StorageError::SerializationError)?;

    let operator: String = row.try_get("operator")?;
    let operator = Operator::from_str(&operator).map_err(StorageError::SerializationError)?;

    let severity: String = row.try_get("severity")?;
    let severity = Severity::from_str(&severity).map_err(StorageError::SerializationError)?;

    let chain: Option<String> = row.try_get("chain")?;
    let chain = chain
        .map(|c| Chain::from_str(&c))
        .transpose()
        .map_err(StorageError::SerializationError)?;

    Ok(AlertRow {
        id: row.try_get("id")?,
        asset_symbol: row.try_get("asset_symbol")?,
        metric,
        value: row.try_get("value")?,
        threshold_value: row.try_get("threshold_value")?,
        operator,
        severity,
        message: row.try_get("message")?,
        chain,
        suppressed_count: row.try_get::<i64, _>("suppressed_count")? as u32,
        notified: row.try_get::<i64, _>("notified")? != 0,
        notification_channel: row.try_get("notification_channel")?,
        delivery_attempts: row.try_get::<i64, _>("delivery_attempts")? as u32,
        failure_reason: row.try_get("failure_reason")?,
        triggered_at: SqliteBackend::from_millis(row.try_get("triggered_at")?),
    })
}

fn threshold_row(row: &SqliteRow) -> StorageResult<ThresholdRule> {
    let metric_name: String = row.try_get("metric_name")?;
    let metric = MetricName::from_str(&metric_name).map_err(StorageError::SerializationError)?;

    let operator: String = row.try_get("operator")?;
    let operator = Operator::from_str(&operator).map_err(StorageError::SerializationError)?;

    let severity: String = row.try_get("severity")?;
    let severity = Severity::from_str(&severity).map_err(StorageError::SerializationError)?;

    Ok(ThresholdRule {
        id: Some(row.try_get("id")?),
        asset_symbol: row.try_get("asset_symbol")?,
        metric,
        operator,
        value: row.try_get("threshold_value")?,
        severity,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn asset_row(row: &SqliteRow) -> StorageResult<AssetRow> {
    let config: String = row.try_get("config")?;
    let config = serde_json::from_str(&config)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    Ok(AssetRow {
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        config,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        created_at: SqliteBackend::from_millis(row.try_get("created_at")?),
        updated_at: SqliteBackend::from_millis(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn append_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for sample in samples {
            let metadata = sample
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO rm_metrics_history
                    (asset_symbol, metric_name, value, chain, metadata, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&sample.asset_symbol)
            .bind(sample.metric.as_str())
            .bind(sample.value)
            .bind(sample.chain.map(|c| c.as_str()))
            .bind(metadata)
            .bind(Self::to_millis(&sample.recorded_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn latest_metric(
        &self,
        asset: &str,
        metric: MetricName,
    ) -> StorageResult<Option<MetricRow>> {
        self.latest_metric_at(asset, metric, Utc::now()).await
    }

    async fn latest_metric_at(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Option<MetricRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM rm_metrics_history
            WHERE asset_symbol = ? AND metric_name = ? AND recorded_at <= ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(asset)
        .bind(metric.as_str())
        .bind(Self::to_millis(&cutoff))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(metric_row).transpose()
    }

    async fn latest_metric_by_chain(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>> {
        let rows = sqlx::query(
            r#"
            SELECT h.* FROM rm_metrics_history h
            WHERE h.asset_symbol = ?1 AND h.metric_name = ?2 AND h.recorded_at <= ?3
              AND NOT EXISTS (
                SELECT 1 FROM rm_metrics_history b
                WHERE b.asset_symbol = ?1 AND b.metric_name = ?2 AND b.recorded_at <= ?3
                  AND coalesce(b.chain, '') = coalesce(h.chain, '')
                  AND (b.recorded_at > h.recorded_at
                       OR (b.recorded_at = h.recorded_at AND b.id > h.id))
              )
            ORDER BY coalesce(h.chain, '')
            "#,
        )
        .bind(asset)
        .bind(metric.as_str())
        .bind(Self::to_millis(&cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(metric_row).collect()
    }

    async fn metric_range(
        &self,
        asset: &str,
        metric: MetricName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM rm_metrics_history
            WHERE asset_symbol = ? AND metric_name = ? AND recorded_at >= ? AND recorded_at <= ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(asset)
        .bind(metric.as_str())
        .bind(Self::to_millis(&from))
        .bind(Self::to_millis(&to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(metric_row).collect()
    }

    async fn latest_metrics_all(&self, asset: &str) -> StorageResult<Vec<MetricRow>> {
        let rows = sqlx::query(
            r#"
            SELECT h.* FROM rm_metrics_history h
            WHERE h.asset_symbol = ?1
              AND NOT EXISTS (
                SELECT 1 FROM rm_metrics_history b
                WHERE b.asset_symbol = ?1 AND b.metric_name = h.metric_name
                  AND (b.recorded_at > h.recorded_at
                       OR (b.recorded_at = h.recorded_at AND b.id > h.id))
              )
            ORDER BY h.metric_name
            "#,
        )
        .bind(asset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(metric_row).collect()
    }

    #[instrument(skip(self, row), fields(symbol = %row.symbol))]
    async fn upsert_asset(&self, row: AssetRow) -> StorageResult<()> {
        let config = serde_json::to_string(&row.config)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rm_asset_registry (symbol, name, config, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (symbol) DO UPDATE SET
                name = excluded.name,
                config = excluded.config,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.symbol)
        .bind(&row.name)
        .bind(config)
        .bind(row.enabled as i64)
        .bind(Self::to_millis(&row.created_at))
        .bind(Self::to_millis(&row.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn get_asset(&self, symbol: &str) -> StorageResult<Option<AssetRow>> {
        let row = sqlx::query("SELECT * FROM rm_asset_registry WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(asset_row).transpose()
    }

    async fn list_assets(&self, enabled_only: bool) -> StorageResult<Vec<AssetRow>> {
        let sql = if enabled_only {
            "SELECT * FROM rm_asset_registry WHERE enabled = 1 ORDER BY symbol"
        } else {
            "SELECT * FROM rm_asset_registry ORDER BY symbol"
        };

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(asset_row).collect()
    }

    async fn set_asset_enabled(&self, symbol: &str, enabled: bool) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE rm_asset_registry SET enabled = ?, updated_at = ? WHERE symbol = ?",
        )
        .bind(enabled as i64)
        .bind(Self::to_millis(&Utc::now()))
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_threshold(&self, rule: &ThresholdRule) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rm_alert_thresholds
                (asset_symbol, metric_name, operator, threshold_value, severity, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(rule.asset_symbol.as_deref())
        .bind(rule.metric.as_str())
        .bind(rule.operator.as_str())
        .bind(rule.value)
        .bind(rule.severity.as_str())
        .bind(rule.enabled as i64)
        .bind(Self::to_millis(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn list_thresholds(&self) -> StorageResult<Vec<ThresholdRule>> {
        let rows = sqlx::query("SELECT * FROM rm_alert_thresholds ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(threshold_row).collect()
    }

    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO rm_alerts_log
                (asset_symbol, metric_name, value, threshold_value, operator, severity,
                 message, chain, triggered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&alert.asset_symbol)
        .bind(alert.metric.as_str())
        .bind(alert.value)
        .bind(alert.threshold_value)
        .bind(alert.operator.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.chain.map(|c| c.as_str()))
        .bind(Self::to_millis(&alert.triggered_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.try_get("id")?)
    }

    async fn bump_suppressed(&self, alert_id: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE rm_alerts_log SET suppressed_count = suppressed_count + 1 WHERE id = ?",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn pending_alerts(&self, limit: usize) -> StorageResult<Vec<AlertRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM rm_alerts_log
            WHERE notified = 0 AND failure_reason IS NULL
            ORDER BY
                CASE severity
                    WHEN 'critical' THEN 1
                    WHEN 'warning' THEN 2
                    ELSE 3
                END,
                triggered_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(alert_row).collect()
    }

    async fn mark_alert_notified(&self, alert_id: i64, channel: &str) -> StorageResult<()> {
        sqlx::query(
            "UPDATE rm_alerts_log SET notified = 1, notification_channel = ? WHERE id = ?",
        )
        .bind(channel)
        .bind(alert_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn record_delivery_attempt(&self, alert_id: i64) -> StorageResult<u32> {
        let row = sqlx::query(
            r#"
            UPDATE rm_alerts_log
            SET delivery_attempts = delivery_attempts + 1
            WHERE id = ?
            RETURNING delivery_attempts
            "#,
        )
        .bind(alert_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.try_get::<i64, _>("delivery_attempts")? as u32)
    }

    async fn mark_alert_failed(&self, alert_id: i64, reason: &str) -> StorageResult<()> {
        sqlx::query("UPDATE rm_alerts_log SET failure_reason = ? WHERE id = ?")
            .bind(reason)
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertRow>> {
        let rows = sqlx::query(
            "SELECT * FROM rm_alerts_log WHERE triggered_at > ? ORDER BY triggered_at DESC",
        )
        .bind(Self::to_millis(&since))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(alert_row).collect()
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
