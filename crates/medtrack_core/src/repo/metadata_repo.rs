//! Store-wide metadata: the change version counter and time-window bounds.
//!
//! # Invariants
//! - `metadata.version` only moves forward; the schema trigger rejects any
//!   non-increasing write.
//! - `time_windows` always holds exactly the four named windows.

use crate::model::schedule::{TimeWindow, TimeWindowTable, WindowBounds};
use crate::repo::{count_to_u32, ensure_connection_ready, RepoError, RepoResult};
use rusqlite::{params, Connection};

const REQUIRED_TABLES: &[&str] = &["metadata", "time_windows"];
const VERSION_KEY: &str = "version";

/// SQLite-backed access to the `metadata` and `time_windows` tables.
pub struct SqliteMetadataRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMetadataRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }

    /// Reads the committed version visible to this connection.
    pub fn read_version(&self) -> RepoResult<u64> {
        let value: i64 = self.conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1;",
            [VERSION_KEY],
            |row| row.get(0),
        )?;
        version_from_db(value)
    }

    /// Increments the version and returns the new value.
    ///
    /// Must run inside the caller's write transaction so the bump commits or
    /// rolls back with the mutation it stamps.
    pub fn bump_version(&self) -> RepoResult<u64> {
        let value: i64 = self.conn.query_row(
            "UPDATE metadata
             SET value = value + 1
             WHERE key = ?1
             RETURNING value;",
            [VERSION_KEY],
            |row| row.get(0),
        )?;
        version_from_db(value)
    }

    pub fn load_time_windows(&self) -> RepoResult<TimeWindowTable> {
        let mut stmt = self.conn.prepare(
            "SELECT name, start_minute, end_minute
             FROM time_windows
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut loaded = [WindowBounds::new(0, 0); 4];
        let mut seen = 0usize;
        while let Some(row) = rows.next()? {
            let name: String = row.get("name")?;
            let window = TimeWindow::from_code(&name).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid window `{name}` in time_windows.name"))
            })?;
            loaded[window.position()] = WindowBounds::new(
                count_to_u32(row.get("start_minute")?, "time_windows.start_minute")?,
                count_to_u32(row.get("end_minute")?, "time_windows.end_minute")?,
            );
            seen += 1;
        }

        if seen != TimeWindow::ALL.len() {
            return Err(RepoError::InvalidData(format!(
                "expected {} time_windows rows, found {seen}",
                TimeWindow::ALL.len()
            )));
        }
        TimeWindowTable::try_new(loaded)
            .map_err(|err| RepoError::InvalidData(format!("invalid time_windows rows: {err}")))
    }

    /// Overwrites the persisted bounds of every window.
    pub fn store_time_windows(&self, table: &TimeWindowTable) -> RepoResult<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE time_windows
             SET start_minute = ?2, end_minute = ?3
             WHERE name = ?1;",
        )?;
        for (window, bounds) in table.iter() {
            let changed = stmt.execute(params![
                window.code(),
                bounds.start_minute,
                bounds.end_minute
            ])?;
            if changed == 0 {
                return Err(RepoError::InvalidData(format!(
                    "missing time_windows row for `{window}`"
                )));
            }
        }
        Ok(())
    }
}

fn version_from_db(value: i64) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid version `{value}` in metadata")))
}
