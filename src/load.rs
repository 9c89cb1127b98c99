use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, params};
use serde::Serialize;

use crate::domain::{Nid, RecallRecord, StoredRecall};
use crate::error::RecallError;
use crate::store::{encode_date, encode_dt, read_all};

const UPSERT_SQL: &str = "
INSERT INTO food_recalls (
    nid, title, url, product, issue, main_issue, secondary_issue,
    bacteria_subtype, category, class, last_updated, is_archived, created_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)
ON CONFLICT(nid) DO UPDATE SET
    title            = excluded.title,
    url              = excluded.url,
    product          = excluded.product,
    issue            = excluded.issue,
    main_issue       = excluded.main_issue,
    secondary_issue  = excluded.secondary_issue,
    bacteria_subtype = excluded.bacteria_subtype,
    category         = excluded.category,
    class            = excluded.class,
    last_updated     = excluded.last_updated,
    is_archived      = 0";

const ARCHIVE_SQL: &str = "UPDATE food_recalls SET is_archived = 1 WHERE nid = ?1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Archived rows that reappeared in this batch.
    pub restored: usize,
    /// Rows newly flagged archived by the sweep.
    pub archived: usize,
}

impl LoadReport {
    pub fn written(&self) -> usize {
        self.inserted + self.updated + self.restored + self.archived
    }
}

/// Applies one batch: upsert every record by NID, then archive every stored
/// NID the batch does not mention. All of it commits together or not at all.
pub struct Loader;

impl Loader {
    pub fn load(
        conn: &mut Connection,
        records: &[RecallRecord],
        now: DateTime<Utc>,
    ) -> Result<LoadReport, RecallError> {
        Self::load_retaining(conn, records, &BTreeSet::new(), now)
    }

    /// Like [`Loader::load`], but the NIDs in `retained` are still listed
    /// upstream even though the batch carries no record for them (dropped or
    /// filtered out). The archive sweep leaves their rows as they are.
    pub fn load_retaining(
        conn: &mut Connection,
        records: &[RecallRecord],
        retained: &BTreeSet<Nid>,
        now: DateTime<Utc>,
    ) -> Result<LoadReport, RecallError> {
        let batch = index_batch(records)?;
        let tx = conn.transaction().map_err(load_error)?;
        let report = Self::apply(&tx, &batch, retained, now)?;
        tx.commit().map_err(load_error)?;
        Ok(report)
    }

    fn apply(
        tx: &Transaction<'_>,
        batch: &HashMap<Nid, &RecallRecord>,
        retained: &BTreeSet<Nid>,
        now: DateTime<Utc>,
    ) -> Result<LoadReport, RecallError> {
        let existing = read_all(tx)
            .map_err(load_error)?
            .into_iter()
            .map(|stored| (stored.record.nid, stored))
            .collect::<HashMap<Nid, StoredRecall>>();
        let created_at = encode_dt(now);
        let mut report = LoadReport::default();

        {
            let mut upsert = tx.prepare_cached(UPSERT_SQL).map_err(load_error)?;
            for record in batch.values() {
                match existing.get(&record.nid) {
                    Some(stored) if !stored.is_archived && stored.record == **record => {
                        report.unchanged += 1;
                        continue;
                    }
                    Some(stored) if stored.is_archived => report.restored += 1,
                    Some(_) => report.updated += 1,
                    None => report.inserted += 1,
                }
                upsert
                    .execute(params![
                        record.nid.get(),
                        record.title,
                        record.url,
                        record.product,
                        record.issue,
                        record.main_issue,
                        record.secondary_issue,
                        record.bacteria_subtype,
                        record.category,
                        record.class.as_str(),
                        encode_date(record.last_updated),
                        created_at,
                    ])
                    .map_err(load_error)?;
            }
        }

        let mut archive = tx.prepare_cached(ARCHIVE_SQL).map_err(load_error)?;
        let stale = existing.values().filter(|stored| {
            let nid = &stored.record.nid;
            !stored.is_archived && !batch.contains_key(nid) && !retained.contains(nid)
        });
        for stored in stale {
            archive
                .execute(params![stored.record.nid.get()])
                .map_err(load_error)?;
            report.archived += 1;
        }

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            restored = report.restored,
            archived = report.archived,
            "applied recall batch"
        );
        Ok(report)
    }
}

fn index_batch(records: &[RecallRecord]) -> Result<HashMap<Nid, &RecallRecord>, RecallError> {
    let mut batch = HashMap::with_capacity(records.len());
    for record in records {
        if batch.insert(record.nid, record).is_some() {
            return Err(RecallError::Load(format!(
                "duplicate NID {} in batch",
                record.nid
            )));
        }
    }
    Ok(batch)
}

fn load_error(err: rusqlite::Error) -> RecallError {
    RecallError::Load(err.to_string())
}
