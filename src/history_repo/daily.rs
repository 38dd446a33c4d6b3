// Daily records: rollup of a closed day's samples, and range queries that merge
// hot rows with monthly archives.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::Row;
use tracing::{info, instrument, warn};

use super::aggregation::{day_key, month_key, parse_day_key};
use super::{HistoryRepo, from_db, to_db};
use crate::calendar::{day_start, local_date, next_day};
use crate::models::{DailyRecord, Usage};

impl HistoryRepo {
    /// Sums the samples of closed `day` per node into daily records, replacing any
    /// previous rollup of that day. Returns the number of records written.
    ///
    /// Days that are not closed yet fail. Days already past the hot window, or whose
    /// samples have partly expired, are left untouched (returns 0).
    #[instrument(skip(self), fields(repo = "history", operation = "rollup"))]
    pub async fn rollup(&self, day: NaiveDate, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let tz = self.settings.timezone;
        let today = local_date(tz, now);
        anyhow::ensure!(day < today, "cannot roll up {}: day is not closed yet", day);

        let hot_cut = today - Duration::days(self.settings.hot_days as i64);
        if day < hot_cut {
            warn!(day = %day, "day is past the hot window; archived days are not rolled up");
            return Ok(0);
        }

        let from = day_start(tz, day);
        let to = day_start(tz, next_day(day));
        if from.timestamp() < self.settings.sample_cutoff(now) {
            warn!(day = %day, "samples for day partly expired; keeping existing daily records");
            return Ok(0);
        }

        let _guard = self.maintenance_lock.lock().await;
        let sums = self
            .sum_samples_by_node(from.timestamp(), to.timestamp())
            .await?;
        let key = day_key(day);

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM daily_records WHERE day = $1")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        for (node_id, usage) in &sums {
            sqlx::query(
                "INSERT INTO daily_records (node_id, day, upload, download) VALUES ($1, $2, $3, $4)",
            )
            .bind(node_id)
            .bind(&key)
            .bind(to_db(usage.upload))
            .bind(to_db(usage.download))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(day = %key, nodes = sums.len(), "daily rollup complete");
        Ok(sums.len())
    }

    /// Daily records for from..=to ascending by (day, node), hot rows and archives merged.
    /// `node_id = None` means all nodes.
    #[instrument(skip(self), fields(repo = "history", operation = "query_daily"))]
    pub async fn query_daily(
        &self,
        node_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<DailyRecord>> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut merged: BTreeMap<(NaiveDate, String), Usage> = BTreeMap::new();

        for record in self
            .load_archived(node_id, &month_key(from), &month_key(to))
            .await?
        {
            if record.day >= from && record.day <= to {
                merged.insert((record.day, record.node_id), record.usage);
            }
        }

        // Hot rows win over an archived copy of the same day.
        for record in self.load_hot(node_id, from, to).await? {
            merged.insert((record.day, record.node_id), record.usage);
        }

        Ok(merged
            .into_iter()
            .map(|((day, node_id), usage)| DailyRecord {
                node_id,
                day,
                usage,
            })
            .collect())
    }

    async fn load_hot(
        &self,
        node_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<DailyRecord>> {
        let rows = match node_id {
            Some(id) => {
                sqlx::query(
                    "SELECT node_id, day, upload, download FROM daily_records
                     WHERE node_id = $1 AND day >= $2 AND day <= $3 ORDER BY day ASC",
                )
                .bind(id)
                .bind(day_key(from))
                .bind(day_key(to))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT node_id, day, upload, download FROM daily_records
                     WHERE day >= $1 AND day <= $2 ORDER BY day ASC, node_id ASC",
                )
                .bind(day_key(from))
                .bind(day_key(to))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.try_get("day")?;
            out.push(DailyRecord {
                node_id: row.try_get("node_id")?,
                day: parse_day_key(&day)?,
                usage: Usage::new(
                    from_db(row.try_get("upload")?),
                    from_db(row.try_get("download")?),
                ),
            });
        }
        Ok(out)
    }
}
