use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored day-session. `end_timestamp == None` means the day is still open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRow {
    pub id: i64,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl DayRow {
    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }
}

pub struct DayRepo {
    db: Database,
}

impl DayRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM days", [], |row| row.get(0))?)
        })
    }

    /// Create an open day starting at `start`.
    #[instrument(skip(self), fields(start = %start))]
    pub fn create(&self, start: DateTime<Utc>) -> Result<DayRow, StoreError> {
        self.db.with_conn(|conn| insert_open(conn, start))
    }

    /// All days, ordered by id.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<DayRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, start_ts, end_ts FROM days ORDER BY id ASC")?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_day(row)?);
            }
            Ok(results)
        })
    }

    /// Close all open days and open a new one, atomically.
    /// Returns the number of days closed and the new day. The closed days'
    /// end timestamp equals the new day's start as stored.
    #[instrument(skip(self), fields(at = %at))]
    pub fn rollover(&self, at: DateTime<Utc>) -> Result<(usize, DayRow), StoreError> {
        let at = row_helpers::to_stored_precision(at);
        self.db.transaction(|tx| {
            let closed = close_open(tx, at)?;
            let day = insert_open(tx, at)?;
            Ok((closed, day))
        })
    }
}

fn insert_open(conn: &Connection, start: DateTime<Utc>) -> Result<DayRow, StoreError> {
    let start = row_helpers::to_stored_precision(start);
    conn.execute(
        "INSERT INTO days (start_ts, end_ts) VALUES (?1, NULL)",
        [row_helpers::format_ts(&start)],
    )?;
    Ok(DayRow {
        id: conn.last_insert_rowid(),
        start_timestamp: start,
        end_timestamp: None,
    })
}

fn close_open(conn: &Connection, at: DateTime<Utc>) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE days SET end_ts = ?1 WHERE end_ts IS NULL",
        [row_helpers::format_ts(&at)],
    )?)
}

fn row_to_day(row: &rusqlite::Row<'_>) -> Result<DayRow, StoreError> {
    let start: String = row_helpers::get(row, 1, "days", "start_ts")?;
    let end = row_helpers::get_opt::<String>(row, 2, "days", "end_ts")?
        .map(|raw| row_helpers::parse_ts(&raw, "days", "end_ts"))
        .transpose()?;

    Ok(DayRow {
        id: row_helpers::get(row, 0, "days", "id")?,
        start_timestamp: row_helpers::parse_ts(&start, "days", "start_ts")?,
        end_timestamp: end,
    })
}
