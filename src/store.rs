use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::{Nid, RecallClass, RecallRecord, StoredRecall};
use crate::error::RecallError;

/// Table DDL; idempotent so it can run on every open.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS food_recalls (
    nid              INTEGER PRIMARY KEY,
    title            TEXT NOT NULL,
    url              TEXT NOT NULL,
    product          TEXT NOT NULL,
    issue            TEXT NOT NULL,
    main_issue       TEXT,
    secondary_issue  TEXT,
    bacteria_subtype TEXT,
    category         TEXT NOT NULL,
    class            TEXT NOT NULL,
    last_updated     TEXT NOT NULL,  -- YYYY-MM-DD
    is_archived      INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS food_recalls_archived_idx ON food_recalls(is_archived);
CREATE INDEX IF NOT EXISTS food_recalls_category_idx ON food_recalls(category);

PRAGMA user_version = 1;
";

const SELECT_COLUMNS: &str = "nid, title, url, product, issue, main_issue, secondary_issue, \
     bacteria_subtype, category, class, last_updated, is_archived, created_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct RecallStore {
    conn: Connection,
}

impl RecallStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: &Utf8Path) -> Result<Self, RecallError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RecallError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path()).map_err(database_error)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(database_error)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RecallError> {
        let conn = Connection::open_in_memory().map_err(database_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, RecallError> {
        conn.execute_batch(SCHEMA).map_err(database_error)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn get(&self, nid: Nid) -> Result<Option<StoredRecall>, RecallError> {
        self.conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM food_recalls WHERE nid = ?1"),
                params![nid.get()],
                read_row,
            )
            .optional()
            .map_err(database_error)
    }

    /// Every stored row, ordered by NID.
    pub fn all(&self) -> Result<Vec<StoredRecall>, RecallError> {
        read_all(&self.conn).map_err(database_error)
    }

    pub fn count(&self) -> Result<usize, RecallError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM food_recalls", [], |row| row.get(0))
            .map_err(database_error)?;
        Ok(count as usize)
    }

    pub fn count_archived(&self) -> Result<usize, RecallError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM food_recalls WHERE is_archived = 1",
                [],
                |row| row.get(0),
            )
            .map_err(database_error)?;
        Ok(count as usize)
    }
}

pub(crate) fn read_all(conn: &Connection) -> rusqlite::Result<Vec<StoredRecall>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM food_recalls ORDER BY nid"
    ))?;
    let rows = stmt.query_map([], read_row)?;
    rows.collect()
}

pub(crate) fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRecall> {
    let class_text: String = row.get(9)?;
    let class = class_text
        .parse::<RecallClass>()
        .map_err(|err| conversion_error(9, err))?;
    let last_updated_text: String = row.get(10)?;
    let last_updated = NaiveDate::parse_from_str(&last_updated_text, DATE_FORMAT)
        .map_err(|err| conversion_error(10, err.to_string()))?;
    let created_at_text: String = row.get(12)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_text)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| conversion_error(12, err.to_string()))?;

    Ok(StoredRecall {
        record: RecallRecord {
            nid: Nid::new(row.get(0)?),
            title: row.get(1)?,
            url: row.get(2)?,
            product: row.get(3)?,
            issue: row.get(4)?,
            main_issue: row.get(5)?,
            secondary_issue: row.get(6)?,
            bacteria_subtype: row.get(7)?,
            category: row.get(8)?,
            class,
            last_updated,
        },
        is_archived: row.get(11)?,
        created_at,
    })
}

pub(crate) fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn conversion_error(column: usize, message: impl Into<String>) -> rusqlite::Error {
    let message: String = message.into();
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

pub(crate) fn database_error(err: rusqlite::Error) -> RecallError {
    RecallError::Database(err.to_string())
}
