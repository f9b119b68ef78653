//! Tracking event repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Append terminal dose events (`taken` / `skipped`).
//! - Serve filtered event listings for the reminder engine, history and
//!   adherence views.
//!
//! # Invariants
//! - Events are insert-only; the schema trigger rejects any UPDATE.
//! - A second event for the same (medicine, date, window) is a
//!   `ConflictKind::AlreadyResolved`, never an overwrite.

use crate::db::{constraint_kind, ConstraintKind};
use crate::model::medicine::MedicineId;
use crate::model::schedule::TimeWindow;
use crate::model::tracking::{
    DoseStatus, EventKind, NewTrackingEvent, SkipReason, TrackingEvent, TrackingFilter,
    TrackingRecord,
};
use crate::repo::medicine_repo::parse_medicine_id;
use crate::repo::{
    date_to_db, ensure_connection_ready, parse_date, parse_timestamp, timestamp_to_db,
    ConflictKind, RepoError, RepoResult,
};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const REQUIRED_TABLES: &[&str] = &["medicines", "tracking", "time_windows"];

const EVENT_COLUMNS: &str = "t.id AS id,
    t.medicine_id AS medicine_id,
    t.date AS date,
    t.time_window AS time_window,
    t.status AS status,
    t.event_timestamp AS event_timestamp,
    t.skip_reason AS skip_reason,
    t.skip_notes AS skip_notes";

/// Repository interface for tracking events.
pub trait TrackingRepository {
    /// Appends one event. Fails with `Conflict` if the dose is already resolved
    /// and `NotFound` if the medicine does not exist.
    fn append_event(&self, event: &NewTrackingEvent) -> RepoResult<TrackingEvent>;
    fn find_event(
        &self,
        medicine_id: MedicineId,
        date: NaiveDate,
        time_window: TimeWindow,
    ) -> RepoResult<Option<TrackingEvent>>;
    /// Lists events in day order: date, window position, then insertion order.
    fn list_events(&self, filter: &TrackingFilter) -> RepoResult<Vec<TrackingEvent>>;
    /// Lists events joined with medicine name/dosage, newest first.
    fn list_records(
        &self,
        filter: &TrackingFilter,
        limit: Option<u32>,
    ) -> RepoResult<Vec<TrackingRecord>>;
    fn count_events_for_medicine(&self, medicine_id: MedicineId) -> RepoResult<u64>;
}

/// SQLite-backed tracking repository.
pub struct SqliteTrackingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTrackingRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }
}

impl TrackingRepository for SqliteTrackingRepository<'_> {
    fn append_event(&self, event: &NewTrackingEvent) -> RepoResult<TrackingEvent> {
        let (status, skip_reason, skip_notes) = match &event.kind {
            EventKind::Taken => (DoseStatus::Taken, None, None),
            EventKind::Skipped { reason, notes } => {
                (DoseStatus::Skipped, Some(*reason), notes.clone())
            }
        };
        let date_text = date_to_db(event.date);
        let timestamp_ms = timestamp_to_db(event.event_timestamp);

        let inserted = self.conn.execute(
            "INSERT INTO tracking (
                medicine_id,
                date,
                time_window,
                status,
                event_timestamp,
                skip_reason,
                skip_notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                event.medicine_id.to_string(),
                date_text.as_str(),
                event.time_window.code(),
                status.code(),
                timestamp_ms,
                skip_reason.map(SkipReason::code),
                skip_notes.as_deref(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) => {
                return Err(match constraint_kind(&err) {
                    Some(ConstraintKind::Unique) => {
                        match self.find_event(event.medicine_id, event.date, event.time_window)? {
                            Some(existing) => RepoError::Conflict(ConflictKind::AlreadyResolved {
                                medicine_id: event.medicine_id,
                                date: event.date,
                                time_window: event.time_window,
                                status: existing.status,
                            }),
                            None => err.into(),
                        }
                    }
                    Some(ConstraintKind::ForeignKey) => RepoError::NotFound(event.medicine_id),
                    _ => err.into(),
                });
            }
        }

        Ok(TrackingEvent {
            id: self.conn.last_insert_rowid(),
            medicine_id: event.medicine_id,
            date: event.date,
            time_window: event.time_window,
            status,
            event_timestamp: parse_timestamp(timestamp_ms, "tracking.event_timestamp")?,
            skip_reason,
            skip_notes,
        })
    }

    fn find_event(
        &self,
        medicine_id: MedicineId,
        date: NaiveDate,
        time_window: TimeWindow,
    ) -> RepoResult<Option<TrackingEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS}
             FROM tracking t
             WHERE t.medicine_id = ?1
               AND t.date = ?2
               AND t.time_window = ?3;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            medicine_id.to_string(),
            date_to_db(date),
            time_window.code()
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_event_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_events(&self, filter: &TrackingFilter) -> RepoResult<Vec<TrackingEvent>> {
        let (filter_sql, bind_values) = build_filter(filter);
        let sql = format!(
            "SELECT {EVENT_COLUMNS}
             FROM tracking t
             INNER JOIN time_windows w ON w.name = t.time_window
             {filter_sql}
             ORDER BY t.date ASC, w.position ASC, t.id ASC;"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }

    fn list_records(
        &self,
        filter: &TrackingFilter,
        limit: Option<u32>,
    ) -> RepoResult<Vec<TrackingRecord>> {
        let (filter_sql, mut bind_values) = build_filter(filter);
        let sql = format!(
            "SELECT {EVENT_COLUMNS},
                m.name AS medicine_name,
                m.dosage AS medicine_dosage
             FROM tracking t
             INNER JOIN medicines m ON m.id = t.medicine_id
             {filter_sql}
             ORDER BY t.date DESC, t.event_timestamp DESC, t.id DESC
             LIMIT ?;"
        );
        bind_values.push(Value::Integer(limit.map_or(-1, i64::from)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(TrackingRecord {
                event: parse_event_row(row)?,
                medicine_name: row.get("medicine_name")?,
                dosage: row.get("medicine_dosage")?,
            });
        }
        Ok(records)
    }

    fn count_events_for_medicine(&self, medicine_id: MedicineId) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracking WHERE medicine_id = ?1;",
            [medicine_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn build_filter(filter: &TrackingFilter) -> (String, Vec<Value>) {
    let mut sql = String::from("WHERE 1 = 1");
    let mut bind_values = Vec::new();

    if let Some(medicine_id) = filter.medicine_id {
        sql.push_str(" AND t.medicine_id = ?");
        bind_values.push(Value::Text(medicine_id.to_string()));
    }
    // ISO dates compare correctly as text.
    if let Some(start) = filter.start_date {
        sql.push_str(" AND t.date >= ?");
        bind_values.push(Value::Text(date_to_db(start)));
    }
    if let Some(end) = filter.end_date {
        sql.push_str(" AND t.date <= ?");
        bind_values.push(Value::Text(date_to_db(end)));
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND t.status = ?");
        bind_values.push(Value::Text(status.code().to_string()));
    }

    (sql, bind_values)
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<TrackingEvent> {
    let medicine_id: String = row.get("medicine_id")?;
    let date: String = row.get("date")?;
    let window: String = row.get("time_window")?;
    let status: String = row.get("status")?;
    let skip_reason: Option<String> = row.get("skip_reason")?;

    let time_window = TimeWindow::from_code(&window).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid time window `{window}` in tracking.time_window"))
    })?;
    let status = DoseStatus::from_code(&status).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status}` in tracking.status"))
    })?;
    let skip_reason = match skip_reason {
        Some(value) => Some(SkipReason::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid skip reason `{value}` in tracking.skip_reason"))
        })?),
        None => None,
    };

    Ok(TrackingEvent {
        id: row.get("id")?,
        medicine_id: parse_medicine_id(&medicine_id)?,
        date: parse_date(&date, "tracking.date")?,
        time_window,
        status,
        event_timestamp: parse_timestamp(row.get("event_timestamp")?, "tracking.event_timestamp")?,
        skip_reason,
        skip_notes: row.get("skip_notes")?,
    })
}
