use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored smoke entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

pub struct EntryRepo {
    db: Database,
}

impl EntryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an entry and read the stored row back by its generated id.
    #[instrument(skip(self))]
    pub fn insert(&self, timestamp: DateTime<Utc>, value: i64) -> Result<EntryRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO smoke_entries (ts, value) VALUES (?1, ?2)",
                rusqlite::params![row_helpers::format_ts(&timestamp), value],
            )?;
            let id = conn.last_insert_rowid();
            fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("entry {id}")))
        })
    }

    /// Get an entry by id. Absent rows are `Ok(None)`.
    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<EntryRow>, StoreError> {
        self.db.with_conn(|conn| fetch(conn, id))
    }

    /// Entries with `start <= ts <= end`, oldest first.
    #[instrument(skip(self), fields(start = %start, end = %end))]
    pub fn list_between(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<EntryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, value FROM smoke_entries
                 WHERE ts BETWEEN ?1 AND ?2
                 ORDER BY ts ASC, id ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![
                row_helpers::format_ts(start),
                row_helpers::format_ts(end),
            ])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_entry(row)?);
            }
            Ok(results)
        })
    }

    /// Delete an entry. Returns false when no row had that id.
    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM smoke_entries WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Value of the most recently inserted entry (greatest id).
    #[instrument(skip(self))]
    pub fn latest_value(&self) -> Result<Option<i64>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM smoke_entries ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Delete an entry and read the largest remaining value in one
    /// transaction. Either both happen or neither does.
    #[instrument(skip(self))]
    pub fn delete_with_max(&self, id: i64) -> Result<(bool, Option<i64>), StoreError> {
        self.db.transaction(|tx| {
            let changed = tx.execute("DELETE FROM smoke_entries WHERE id = ?1", [id])?;
            let max: Option<i64> =
                tx.query_row("SELECT MAX(value) FROM smoke_entries", [], |row| row.get(0))?;
            Ok((changed > 0, max))
        })
    }
}

fn fetch(conn: &rusqlite::Connection, id: i64) -> Result<Option<EntryRow>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, ts, value FROM smoke_entries WHERE id = ?1")?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_entry(row)?)),
        None => Ok(None),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<EntryRow, StoreError> {
    let ts: String = row_helpers::get(row, 1, "smoke_entries", "ts")?;

    Ok(EntryRow {
        id: row_helpers::get(row, 0, "smoke_entries", "id")?,
        timestamp: row_helpers::parse_ts(&ts, "smoke_entries", "ts")?,
        value: row_helpers::get(row, 2, "smoke_entries", "value")?,
    })
}
