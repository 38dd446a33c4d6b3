// Cold tier: daily records past the hot window are folded into one compressed blob
// per (node, month). Archived days stay queryable but are never rolled up again.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::SqliteConnection;
use tracing::{info, instrument};
use wincode::{SchemaRead, SchemaWrite};

use super::aggregation::{day_key, month_key, parse_day_key};
use super::blob::{decode_archive, encode_archive};
use super::{HistoryRepo, from_db};
use crate::calendar::local_date;
use crate::models::{DailyRecord, Usage};

#[derive(Debug, Clone, Default, SchemaRead, SchemaWrite)]
pub(crate) struct MonthArchive {
    pub days: Vec<ArchivedDay>,
}

#[derive(Debug, Clone, SchemaRead, SchemaWrite)]
pub(crate) struct ArchivedDay {
    pub day: String,
    pub upload: u64,
    pub download: u64,
}

/// What one archive pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub archived_records: u64,
    pub purged_records: u64,
    pub months_written: u64,
    pub months_deleted: u64,
}

async fn load_blob(
    conn: &mut SqliteConnection,
    node_id: &str,
    month: &str,
) -> anyhow::Result<MonthArchive> {
    let data: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT data FROM daily_archive WHERE node_id = $1 AND month = $2")
            .bind(node_id)
            .bind(month)
            .fetch_optional(&mut *conn)
            .await?;
    match data {
        Some(bytes) => decode_archive(&bytes),
        None => Ok(MonthArchive::default()),
    }
}

/// Writes the month back, or deletes it once it holds no days. Returns true if deleted.
async fn store_blob(
    conn: &mut SqliteConnection,
    node_id: &str,
    month: &str,
    archive: &MonthArchive,
) -> anyhow::Result<bool> {
    if archive.days.is_empty() {
        sqlx::query("DELETE FROM daily_archive WHERE node_id = $1 AND month = $2")
            .bind(node_id)
            .bind(month)
            .execute(&mut *conn)
            .await?;
        return Ok(true);
    }
    let blob = encode_archive(archive)?;
    sqlx::query("INSERT OR REPLACE INTO daily_archive (node_id, month, data) VALUES ($1, $2, $3)")
        .bind(node_id)
        .bind(month)
        .bind(&blob)
        .execute(&mut *conn)
        .await?;
    Ok(false)
}

/// Merges `incoming` into `archive` (same day replaced), drops days before `retention_cut`.
fn merge_days(archive: &mut MonthArchive, incoming: Vec<ArchivedDay>, retention_cut: &str) {
    let mut by_day: BTreeMap<String, ArchivedDay> = archive
        .days
        .drain(..)
        .map(|d| (d.day.clone(), d))
        .collect();
    for d in incoming {
        by_day.insert(d.day.clone(), d);
    }
    archive.days = by_day
        .into_values()
        .filter(|d| d.day.as_str() >= retention_cut)
        .collect();
}

impl HistoryRepo {
    /// Moves daily records older than the hot window into monthly archives and purges
    /// everything older than total retention. Runs in one transaction.
    #[instrument(skip(self), fields(repo = "history", operation = "archive"))]
    pub async fn archive(&self, now: DateTime<Utc>) -> anyhow::Result<ArchiveSummary> {
        let today = local_date(self.settings.timezone, now);
        let hot_cut = day_key(today - Duration::days(self.settings.hot_days as i64));
        let retention_day = today - Duration::days(self.settings.retention_days as i64);
        let retention_cut = day_key(retention_day);
        let retention_month = month_key(retention_day);

        let _guard = self.maintenance_lock.lock().await;
        let mut summary = ArchiveSummary::default();
        let mut tx = self.pool.begin().await?;

        let r = sqlx::query("DELETE FROM daily_records WHERE day < $1")
            .bind(&retention_cut)
            .execute(&mut *tx)
            .await?;
        summary.purged_records += r.rows_affected();

        let rows = sqlx::query(
            "SELECT node_id, day, upload, download FROM daily_records
             WHERE day < $1 ORDER BY node_id ASC, day ASC",
        )
        .bind(&hot_cut)
        .fetch_all(&mut *tx)
        .await?;

        let mut by_unit: BTreeMap<(String, String), Vec<ArchivedDay>> = BTreeMap::new();
        for row in rows {
            let node_id: String = row.try_get("node_id")?;
            let day: String = row.try_get("day")?;
            let month = month_key(parse_day_key(&day)?);
            by_unit
                .entry((node_id, month))
                .or_default()
                .push(ArchivedDay {
                    day,
                    upload: from_db(row.try_get("upload")?),
                    download: from_db(row.try_get("download")?),
                });
        }

        for ((node_id, month), days) in by_unit {
            summary.archived_records += days.len() as u64;
            let mut archive = load_blob(&mut tx, &node_id, &month).await?;
            merge_days(&mut archive, days, &retention_cut);
            if store_blob(&mut tx, &node_id, &month, &archive).await? {
                summary.months_deleted += 1;
            } else {
                summary.months_written += 1;
            }
        }

        sqlx::query("DELETE FROM daily_records WHERE day < $1")
            .bind(&hot_cut)
            .execute(&mut *tx)
            .await?;

        // Whole months before the retention month go at once; the boundary month is trimmed.
        let r = sqlx::query("DELETE FROM daily_archive WHERE month < $1")
            .bind(&retention_month)
            .execute(&mut *tx)
            .await?;
        summary.months_deleted += r.rows_affected();

        let boundary: Vec<String> =
            sqlx::query_scalar("SELECT node_id FROM daily_archive WHERE month = $1")
                .bind(&retention_month)
                .fetch_all(&mut *tx)
                .await?;
        for node_id in boundary {
            let mut archive = load_blob(&mut tx, &node_id, &retention_month).await?;
            let before = archive.days.len();
            merge_days(&mut archive, Vec::new(), &retention_cut);
            if archive.days.len() != before {
                summary.purged_records += (before - archive.days.len()) as u64;
                if store_blob(&mut tx, &node_id, &retention_month, &archive).await? {
                    summary.months_deleted += 1;
                }
            }
        }

        tx.commit().await?;

        if summary.archived_records > 0 || summary.purged_records > 0 {
            info!(
                archived_records = summary.archived_records,
                purged_records = summary.purged_records,
                months_written = summary.months_written,
                months_deleted = summary.months_deleted,
                "history archive pass"
            );
        }
        Ok(summary)
    }

    /// Archived days in months from_month..=to_month ("YYYY-MM"), unfiltered by day.
    pub(super) async fn load_archived(
        &self,
        node_id: Option<&str>,
        from_month: &str,
        to_month: &str,
    ) -> anyhow::Result<Vec<DailyRecord>> {
        let rows = match node_id {
            Some(id) => {
                sqlx::query(
                    "SELECT node_id, data FROM daily_archive
                     WHERE node_id = $1 AND month >= $2 AND month <= $3",
                )
                .bind(id)
                .bind(from_month)
                .bind(to_month)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT node_id, data FROM daily_archive WHERE month >= $1 AND month <= $2",
                )
                .bind(from_month)
                .bind(to_month)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::new();
        for row in rows {
            let node_id: String = row.try_get("node_id")?;
            let data: Vec<u8> = row.try_get("data")?;
            for d in decode_archive(&data)?.days {
                out.push(DailyRecord {
                    node_id: node_id.clone(),
                    day: parse_day_key(&d.day)?,
                    usage: Usage::new(d.upload, d.download),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str, up: u64) -> ArchivedDay {
        ArchivedDay {
            day: s.into(),
            upload: up,
            download: 0,
        }
    }

    #[test]
    fn merge_days_replaces_same_day_and_sorts() {
        let mut archive = MonthArchive {
            days: vec![day("2026-01-05", 1), day("2026-01-02", 2)],
        };
        merge_days(&mut archive, vec![day("2026-01-05", 9), day("2026-01-03", 3)], "2000-01-01");
        assert_eq!(archive.days.len(), 3);
        assert_eq!(archive.days[0].day, "2026-01-02");
        assert_eq!(archive.days[2].upload, 9);
    }

    #[test]
    fn merge_days_drops_days_before_retention() {
        let mut archive = MonthArchive {
            days: vec![day("2026-01-01", 1), day("2026-01-20", 2)],
        };
        merge_days(&mut archive, Vec::new(), "2026-01-10");
        assert_eq!(archive.days.len(), 1);
        assert_eq!(archive.days[0].day, "2026-01-20");
    }
}
