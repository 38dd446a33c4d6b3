// Rolling per-interval samples. Rows are keyed (node_id, ts) with ts aligned to the
// sampling interval; every append evicts rows older than the retention window.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::SqliteConnection;
use tracing::instrument;

use super::aggregation::align_down;
use super::{HistoryRepo, from_db, to_db};
use crate::models::{Sample, Usage};

/// Adds `usage` to the bucket containing `ts`. A second write into the same bucket
/// (forced cycle inside one interval) folds into it instead of dropping the delta.
pub(super) async fn insert_sample(
    conn: &mut SqliteConnection,
    node_id: &str,
    ts: i64,
    usage: Usage,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO samples (node_id, ts, upload, download) VALUES ($1, $2, $3, $4)
        ON CONFLICT(node_id, ts) DO UPDATE SET
            upload = upload + excluded.upload,
            download = download + excluded.download
        "#,
    )
    .bind(node_id)
    .bind(ts)
    .bind(to_db(usage.upload))
    .bind(to_db(usage.download))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(super) async fn prune_samples_before(
    conn: &mut SqliteConnection,
    cutoff_ts: i64,
) -> anyhow::Result<u64> {
    let r = sqlx::query("DELETE FROM samples WHERE ts < $1")
        .bind(cutoff_ts)
        .execute(&mut *conn)
        .await?;
    Ok(r.rows_affected())
}

impl HistoryRepo {
    /// Writes one sample aligned to the sampling interval, then evicts expired samples.
    #[instrument(skip(self), fields(repo = "history", operation = "append_sample"))]
    pub async fn append_sample(
        &self,
        node_id: &str,
        at: DateTime<Utc>,
        usage: Usage,
    ) -> anyhow::Result<()> {
        let ts = align_down(at.timestamp(), self.settings.sample_interval_secs);
        let mut tx = self.pool.begin().await?;
        insert_sample(&mut tx, node_id, ts, usage).await?;
        prune_samples_before(&mut tx, self.settings.sample_cutoff(at)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Samples with since <= ts < until, ascending by ts then node. `node_id = None` means all nodes.
    #[instrument(skip(self), fields(repo = "history", operation = "query_samples"))]
    pub async fn query_samples(
        &self,
        node_id: Option<&str>,
        since: i64,
        until: i64,
    ) -> anyhow::Result<Vec<Sample>> {
        let rows = match node_id {
            Some(id) => {
                sqlx::query(
                    "SELECT node_id, ts, upload, download FROM samples
                     WHERE node_id = $1 AND ts >= $2 AND ts < $3 ORDER BY ts ASC",
                )
                .bind(id)
                .bind(since)
                .bind(until)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT node_id, ts, upload, download FROM samples
                     WHERE ts >= $1 AND ts < $2 ORDER BY ts ASC, node_id ASC",
                )
                .bind(since)
                .bind(until)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Sample {
                node_id: row.try_get("node_id")?,
                timestamp: row.try_get("ts")?,
                usage: Usage::new(
                    from_db(row.try_get("upload")?),
                    from_db(row.try_get("download")?),
                ),
            });
        }
        Ok(out)
    }

    /// Per-node sums over since <= ts < until, computed in SQL.
    pub(super) async fn sum_samples_by_node(
        &self,
        since: i64,
        until: i64,
    ) -> anyhow::Result<Vec<(String, Usage)>> {
        let rows = sqlx::query(
            "SELECT node_id, SUM(upload) AS upload, SUM(download) AS download FROM samples
             WHERE ts >= $1 AND ts < $2 GROUP BY node_id ORDER BY node_id ASC",
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((
                row.try_get("node_id")?,
                Usage::new(
                    from_db(row.try_get("upload")?),
                    from_db(row.try_get("download")?),
                ),
            ));
        }
        Ok(out)
    }
}
