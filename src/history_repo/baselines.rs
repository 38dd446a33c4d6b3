// Baseline persistence and the per-cycle commit: every node's baseline, sample and
// reset event from one poll cycle land in a single write transaction, so readers see
// the cycle entirely or not at all and concurrent cycles never share a baseline.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqliteConnection};
use tracing::instrument;

use super::aggregation::align_down;
use super::samples::{insert_sample, prune_samples_before};
use super::{HistoryRepo, from_db, to_db};
use crate::models::{Baseline, Node, Usage};

/// One node's outcome for a cycle. `delta` is None when only the baseline moves
/// (first sighting or bootstrap).
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub node: Node,
    pub baseline: Baseline,
    pub delta: Option<Usage>,
    pub reset: bool,
}

const CYCLE_MARK_KEY: &str = "poll.last_cycle_at";

async fn load_baselines(conn: &mut SqliteConnection) -> anyhow::Result<HashMap<String, Baseline>> {
    let rows = sqlx::query(
        "SELECT node_id, last_upload, last_download, accumulated_upload, accumulated_download, last_observed_at
         FROM baselines",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let node_id: String = row.try_get("node_id")?;
        let last_observed_at: i64 = row.try_get("last_observed_at")?;
        let baseline = Baseline {
            node_id: node_id.clone(),
            last_upload: from_db(row.try_get("last_upload")?),
            last_download: from_db(row.try_get("last_download")?),
            accumulated_upload: from_db(row.try_get("accumulated_upload")?),
            accumulated_download: from_db(row.try_get("accumulated_download")?),
            last_observed_at: Utc
                .timestamp_opt(last_observed_at, 0)
                .single()
                .ok_or_else(|| anyhow::anyhow!("bad last_observed_at {}", last_observed_at))?,
        };
        out.insert(node_id, baseline);
    }
    Ok(out)
}

impl HistoryRepo {
    pub async fn get_baselines(&self) -> anyhow::Result<HashMap<String, Baseline>> {
        let mut conn = self.pool.acquire().await?;
        load_baselines(&mut conn).await
    }

    /// Commits one poll cycle: baselines, samples and reset events, then evicts
    /// samples and reset events that fell out of the retention window.
    ///
    /// `plan` receives the baselines read under the database write lock and returns
    /// the updates to write. Cycles from any process sharing the file run one after
    /// another, each planning against the previous one's committed baselines.
    ///
    /// A delta is filed under the bucket containing the observation time, so traffic
    /// read by the first cycle after midnight counts toward the new day.
    #[instrument(
        skip(self, plan),
        fields(repo = "history", operation = "apply_cycle", updates_count = tracing::field::Empty)
    )]
    pub async fn apply_cycle<T>(
        &self,
        now: DateTime<Utc>,
        plan: impl FnOnce(HashMap<String, Baseline>) -> (Vec<NodeUpdate>, T),
    ) -> anyhow::Result<T> {
        let mut tx = self.pool.begin().await?;
        // Writing first takes the write lock (waiting out busy_timeout) before any read.
        sqlx::query("INSERT OR REPLACE INTO kv_state (key, value) VALUES ($1, $2)")
            .bind(CYCLE_MARK_KEY)
            .bind(now.timestamp().to_string())
            .execute(&mut *tx)
            .await?;

        let baselines = load_baselines(&mut tx).await?;
        let (updates, out) = plan(baselines);
        tracing::Span::current().record("updates_count", updates.len());

        for u in &updates {
            let b = &u.baseline;
            sqlx::query(
                r#"
                INSERT INTO baselines
                (node_id, name, last_upload, last_download, accumulated_upload, accumulated_download, last_observed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT(node_id) DO UPDATE SET
                    name = excluded.name,
                    last_upload = excluded.last_upload,
                    last_download = excluded.last_download,
                    accumulated_upload = excluded.accumulated_upload,
                    accumulated_download = excluded.accumulated_download,
                    last_observed_at = excluded.last_observed_at
                "#,
            )
            .bind(&u.node.id)
            .bind(&u.node.name)
            .bind(to_db(b.last_upload))
            .bind(to_db(b.last_download))
            .bind(to_db(b.accumulated_upload))
            .bind(to_db(b.accumulated_download))
            .bind(b.last_observed_at.timestamp())
            .execute(&mut *tx)
            .await?;

            if let Some(delta) = u.delta {
                let ts = align_down(
                    b.last_observed_at.timestamp(),
                    self.settings.sample_interval_secs,
                );
                insert_sample(&mut tx, &u.node.id, ts, delta).await?;
            }

            if u.reset {
                sqlx::query("INSERT INTO reset_events (node_id, observed_at) VALUES ($1, $2)")
                    .bind(&u.node.id)
                    .bind(b.last_observed_at.timestamp())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let cutoff = self.settings.sample_cutoff(now);
        prune_samples_before(&mut tx, cutoff).await?;
        sqlx::query("DELETE FROM reset_events WHERE observed_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(out)
    }

    /// Distinct nodes with a counter reset in [from, to), ordered by name.
    pub async fn reset_nodes_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT DISTINCT r.node_id AS node_id, COALESCE(b.name, r.node_id) AS name
             FROM reset_events r LEFT JOIN baselines b ON b.node_id = r.node_id
             WHERE r.observed_at >= $1 AND r.observed_at < $2
             ORDER BY name ASC",
        )
        .bind(from.timestamp())
        .bind(to.timestamp())
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
