// SQLite state: baselines, rolling samples, hot daily records, monthly archives,
// reset log and small key/value state (chat offset, delivered reports).
// WAL mode: one writer at a time, readers never block on it.

pub mod aggregation;
mod archive;
mod baselines;
mod blob;
mod daily;
mod samples;

pub use archive::ArchiveSummary;
pub use baselines::NodeUpdate;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::config::AppConfig;
use crate::models::Node;

const SCHEMA_VERSION: i64 = 1;
const UPDATE_OFFSET_KEY: &str = "telegram.offset";
const HEALTH_CHECK_KEY: &str = "health.check";

/// Retention and calendar settings the store applies on write.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub timezone: Tz,
    pub sample_interval_secs: i64,
    pub sample_retention_hours: u32,
    pub hot_days: u32,
    pub retention_days: u32,
}

impl StoreSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            timezone: config.history.tz()?,
            sample_interval_secs: config.sampling.interval_secs as i64,
            sample_retention_hours: config.sampling.retention_hours,
            hot_days: config.history.hot_days,
            retention_days: config.history.retention_days,
        })
    }

    pub fn sample_retention_secs(&self) -> i64 {
        (self.sample_retention_hours as i64) * 3600
    }

    /// Oldest sample timestamp kept when the newest write is at `now`.
    pub fn sample_cutoff(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.sample_retention_secs()
    }
}

pub struct HistoryRepo {
    pool: SqlitePool,
    settings: StoreSettings,
    /// Serializes rollup and archive passes.
    maintenance_lock: Mutex<()>,
}

impl HistoryRepo {
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        settings: StoreSettings,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            settings,
            maintenance_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (key, value) VALUES ('schema', $1)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS baselines (
                node_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                last_upload INTEGER NOT NULL,
                last_download INTEGER NOT NULL,
                accumulated_upload INTEGER NOT NULL,
                accumulated_download INTEGER NOT NULL,
                last_observed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                node_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                upload INTEGER NOT NULL,
                download INTEGER NOT NULL,
                PRIMARY KEY (node_id, ts)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_ts ON samples(ts)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reset_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                observed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reset_events_observed_at ON reset_events(observed_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_records (
                node_id TEXT NOT NULL,
                day TEXT NOT NULL,
                upload INTEGER NOT NULL,
                download INTEGER NOT NULL,
                PRIMARY KEY (node_id, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_daily_records_day ON daily_records(day)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_archive (
                node_id TEXT NOT NULL,
                month TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (node_id, month)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_state (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store is readable (schema present) and writable (marker row round-trips in a transaction).
    #[instrument(skip(self), fields(repo = "history", operation = "health"))]
    pub async fn health(&self) -> anyhow::Result<()> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT value FROM schema_version WHERE key = 'schema'")
                .fetch_optional(&self.pool)
                .await?;
        anyhow::ensure!(version.is_some(), "schema_version missing; store not initialized");

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR REPLACE INTO kv_state (key, value) VALUES ($1, $2)")
            .bind(HEALTH_CHECK_KEY)
            .bind(Utc::now().timestamp().to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kv_state WHERE key = $1")
            .bind(HEALTH_CHECK_KEY)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("value")?))
    }

    pub async fn set_state(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO kv_state (key, value) VALUES ($1, $2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Next Telegram update id to request; None before the first processed batch.
    pub async fn get_update_offset(&self) -> anyhow::Result<Option<i64>> {
        let Some(value) = self.get_state(UPDATE_OFFSET_KEY).await? else {
            return Ok(None);
        };
        let offset = value
            .trim()
            .parse::<i64>()
            .map_err(|e| anyhow::anyhow!("corrupt {} value {:?}: {}", UPDATE_OFFSET_KEY, value, e))?;
        Ok(Some(offset))
    }

    pub async fn set_update_offset(&self, offset: i64) -> anyhow::Result<()> {
        self.set_state(UPDATE_OFFSET_KEY, &offset.to_string()).await
    }

    /// Every node that ever produced a baseline, ordered by id.
    pub async fn known_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let rows = sqlx::query("SELECT node_id, name FROM baselines ORDER BY node_id ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Node {
                id: row.try_get("node_id")?,
                name: row.try_get("name")?,
            });
        }
        Ok(out)
    }
}

/// SQLite INTEGER is i64; byte counters never get near the limit.
fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_db(v: i64) -> u64 {
    v.max(0) as u64
}
