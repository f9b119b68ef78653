//! Medicine repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD APIs over `medicines` and its `medicine_days` schedule rows.
//! - Own the guarded inventory decrement used by "mark taken".
//!
//! # Invariants
//! - Writes only accept validated `MedicineDraft` values.
//! - `pills_remaining` never goes below zero; the schema CHECK rejects the
//!   statement and the failure surfaces as `ConflictKind::InsufficientStock`.
//! - Deleting a medicine removes its schedule and tracking rows through
//!   foreign key cascades in the caller's transaction.

use crate::db::{constraint_kind, ConstraintKind, DbError};
use crate::model::medicine::{Medicine, MedicineDraft, MedicineId};
use crate::model::schedule::{normalize_weekdays, parse_weekday, weekday_code, TimeWindow};
use crate::model::tracking::DoseStatus;
use crate::repo::{
    bool_to_int, count_to_u32, ensure_connection_ready, int_to_bool, parse_timestamp,
    timestamp_to_db,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const MEDICINE_SELECT_SQL: &str = "SELECT
    id,
    name,
    dosage,
    time_window,
    with_food,
    pills_remaining,
    pills_per_dose,
    low_stock_threshold,
    notes,
    active,
    created_at,
    updated_at,
    (
        SELECT group_concat(day, ',')
        FROM medicine_days d
        WHERE d.medicine_id = medicines.id
    ) AS days
FROM medicines";

const REQUIRED_TABLES: &[&str] = &["medicines", "medicine_days", "tracking"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Business rule violated by a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Decrement would push `pills_remaining` below zero.
    InsufficientStock {
        medicine_id: MedicineId,
        pills_remaining: u32,
        pills_per_dose: u32,
    },
    /// The dose already carries a terminal event.
    AlreadyResolved {
        medicine_id: MedicineId,
        date: NaiveDate,
        time_window: TimeWindow,
        status: DoseStatus,
    },
}

impl Display for ConflictKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientStock {
                medicine_id,
                pills_remaining,
                pills_per_dose,
            } => write!(
                f,
                "insufficient stock for medicine {medicine_id}: {pills_remaining} remaining, {pills_per_dose} per dose"
            ),
            Self::AlreadyResolved {
                medicine_id,
                date,
                time_window,
                status,
            } => write!(
                f,
                "dose for medicine {medicine_id} on {date} ({time_window}) is already {}",
                status.code()
            ),
        }
    }
}

/// Generic repository error for medicine and tracking persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(MedicineId),
    Conflict(ConflictKind),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "medicine not found: {id}"),
            Self::Conflict(kind) => write!(f, "{kind}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing medicines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedicineListQuery {
    pub include_inactive: bool,
    pub time_window: Option<TimeWindow>,
    /// Only rows with `pills_remaining <= low_stock_threshold`.
    pub low_stock_only: bool,
    /// `None` returns every matching row.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for medicine persistence.
pub trait MedicineRepository {
    /// Inserts a new medicine with a fresh id.
    fn create_medicine(&self, draft: &MedicineDraft, now: DateTime<Utc>) -> RepoResult<Medicine>;
    /// Replaces every mutable field; `id` and `created_at` are preserved.
    fn update_medicine(
        &self,
        id: MedicineId,
        draft: &MedicineDraft,
        now: DateTime<Utc>,
    ) -> RepoResult<Medicine>;
    /// Deletes one medicine and returns how many tracking events went with it.
    fn delete_medicine(&self, id: MedicineId) -> RepoResult<u64>;
    fn get_medicine(&self, id: MedicineId) -> RepoResult<Option<Medicine>>;
    /// Lists medicines ordered by name (case-insensitive), then id.
    fn list_medicines(&self, query: &MedicineListQuery) -> RepoResult<Vec<Medicine>>;
    /// Counts rows matching `query`, ignoring its limit/offset.
    fn count_medicines(&self, query: &MedicineListQuery) -> RepoResult<u64>;
    /// Subtracts `amount` pills and returns the new remaining count.
    fn decrement_pills(
        &self,
        id: MedicineId,
        amount: u32,
        now: DateTime<Utc>,
    ) -> RepoResult<u32>;
}

/// SQLite-backed medicine repository.
pub struct SqliteMedicineRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMedicineRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }

    fn replace_days(&self, id: &str, draft: &MedicineDraft) -> RepoResult<()> {
        self.conn
            .execute("DELETE FROM medicine_days WHERE medicine_id = ?1;", [id])?;
        let mut stmt = self
            .conn
            .prepare("INSERT INTO medicine_days (medicine_id, day) VALUES (?1, ?2);")?;
        for day in &draft.days {
            stmt.execute(params![id, weekday_code(*day)])?;
        }
        Ok(())
    }
}

impl MedicineRepository for SqliteMedicineRepository<'_> {
    fn create_medicine(&self, draft: &MedicineDraft, now: DateTime<Utc>) -> RepoResult<Medicine> {
        let id = Uuid::new_v4();
        let id_text = id.to_string();
        let now_ms = timestamp_to_db(now);

        self.conn.execute(
            "INSERT INTO medicines (
                id,
                name,
                dosage,
                time_window,
                with_food,
                pills_remaining,
                pills_per_dose,
                low_stock_threshold,
                notes,
                active,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11);",
            params![
                id_text.as_str(),
                draft.name.as_str(),
                draft.dosage.as_str(),
                draft.time_window.code(),
                bool_to_int(draft.with_food),
                draft.pills_remaining,
                draft.pills_per_dose,
                draft.low_stock_threshold,
                draft.notes.as_deref(),
                bool_to_int(draft.active),
                now_ms,
            ],
        )?;
        self.replace_days(&id_text, draft)?;

        // Round-trip through storage precision (milliseconds).
        let stored_at = parse_timestamp(now_ms, "medicines.created_at")?;
        Ok(Medicine {
            id,
            name: draft.name.clone(),
            dosage: draft.dosage.clone(),
            time_window: draft.time_window,
            days: draft.days.clone(),
            with_food: draft.with_food,
            pills_remaining: draft.pills_remaining,
            pills_per_dose: draft.pills_per_dose,
            low_stock_threshold: draft.low_stock_threshold,
            notes: draft.notes.clone(),
            active: draft.active,
            created_at: stored_at,
            updated_at: stored_at,
        })
    }

    fn update_medicine(
        &self,
        id: MedicineId,
        draft: &MedicineDraft,
        now: DateTime<Utc>,
    ) -> RepoResult<Medicine> {
        let id_text = id.to_string();
        let changed = self.conn.execute(
            "UPDATE medicines
             SET
                name = ?2,
                dosage = ?3,
                time_window = ?4,
                with_food = ?5,
                pills_remaining = ?6,
                pills_per_dose = ?7,
                low_stock_threshold = ?8,
                notes = ?9,
                active = ?10,
                updated_at = ?11
             WHERE id = ?1;",
            params![
                id_text.as_str(),
                draft.name.as_str(),
                draft.dosage.as_str(),
                draft.time_window.code(),
                bool_to_int(draft.with_food),
                draft.pills_remaining,
                draft.pills_per_dose,
                draft.low_stock_threshold,
                draft.notes.as_deref(),
                bool_to_int(draft.active),
                timestamp_to_db(now),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        self.replace_days(&id_text, draft)?;
        self.get_medicine(id)?.ok_or(RepoError::NotFound(id))
    }

    fn delete_medicine(&self, id: MedicineId) -> RepoResult<u64> {
        let id_text = id.to_string();
        let events: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracking WHERE medicine_id = ?1;",
            [id_text.as_str()],
            |row| row.get(0),
        )?;

        let changed = self
            .conn
            .execute("DELETE FROM medicines WHERE id = ?1;", [id_text.as_str()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(u64::try_from(events).unwrap_or(0))
    }

    fn get_medicine(&self, id: MedicineId) -> RepoResult<Option<Medicine>> {
        let sql = format!("{MEDICINE_SELECT_SQL} WHERE id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_medicine_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_medicines(&self, query: &MedicineListQuery) -> RepoResult<Vec<Medicine>> {
        let (filter_sql, mut bind_values) = build_filter(query);
        let mut sql = format!("{MEDICINE_SELECT_SQL}{filter_sql}");
        sql.push_str(" ORDER BY name COLLATE NOCASE ASC, id ASC LIMIT ? OFFSET ?;");
        // SQLite treats a negative LIMIT as unbounded.
        bind_values.push(Value::Integer(query.limit.map_or(-1, i64::from)));
        bind_values.push(Value::Integer(i64::from(query.offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut medicines = Vec::new();
        while let Some(row) = rows.next()? {
            medicines.push(parse_medicine_row(row)?);
        }
        Ok(medicines)
    }

    fn count_medicines(&self, query: &MedicineListQuery) -> RepoResult<u64> {
        let (filter_sql, bind_values) = build_filter(query);
        let sql = format!("SELECT COUNT(*) FROM medicines{filter_sql};");
        let count: i64 =
            self.conn
                .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn decrement_pills(
        &self,
        id: MedicineId,
        amount: u32,
        now: DateTime<Utc>,
    ) -> RepoResult<u32> {
        let id_text = id.to_string();
        let result = self
            .conn
            .query_row(
                "UPDATE medicines
                 SET
                    pills_remaining = pills_remaining - ?2,
                    updated_at = ?3
                 WHERE id = ?1
                 RETURNING pills_remaining;",
                params![id_text.as_str(), amount, timestamp_to_db(now)],
                |row| row.get::<_, i64>(0),
            )
            .optional();

        match result {
            Ok(Some(remaining)) => count_to_u32(remaining, "medicines.pills_remaining"),
            Ok(None) => Err(RepoError::NotFound(id)),
            Err(err) if constraint_kind(&err) == Some(ConstraintKind::Check) => {
                let current = self.get_medicine(id)?.ok_or(RepoError::NotFound(id))?;
                Err(RepoError::Conflict(ConflictKind::InsufficientStock {
                    medicine_id: id,
                    pills_remaining: current.pills_remaining,
                    pills_per_dose: amount,
                }))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn build_filter(query: &MedicineListQuery) -> (String, Vec<Value>) {
    let mut sql = String::from(" WHERE 1 = 1");
    let mut bind_values = Vec::new();

    if !query.include_inactive {
        sql.push_str(" AND active = 1");
    }
    if let Some(window) = query.time_window {
        sql.push_str(" AND time_window = ?");
        bind_values.push(Value::Text(window.code().to_string()));
    }
    if query.low_stock_only {
        sql.push_str(" AND pills_remaining <= low_stock_threshold");
    }

    (sql, bind_values)
}

fn parse_medicine_row(row: &Row<'_>) -> RepoResult<Medicine> {
    let id_text: String = row.get("id")?;
    let window_text: String = row.get("time_window")?;
    let days_text: Option<String> = row.get("days")?;

    let time_window = TimeWindow::from_code(&window_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid time window `{window_text}` in medicines.time_window"
        ))
    })?;

    Ok(Medicine {
        id: parse_medicine_id(&id_text)?,
        name: row.get("name")?,
        dosage: row.get("dosage")?,
        time_window,
        days: parse_days(days_text.as_deref().unwrap_or_default())?,
        with_food: int_to_bool(row.get("with_food")?, "medicines.with_food")?,
        pills_remaining: count_to_u32(row.get("pills_remaining")?, "medicines.pills_remaining")?,
        pills_per_dose: count_to_u32(row.get("pills_per_dose")?, "medicines.pills_per_dose")?,
        low_stock_threshold: count_to_u32(
            row.get("low_stock_threshold")?,
            "medicines.low_stock_threshold",
        )?,
        notes: row.get("notes")?,
        active: int_to_bool(row.get("active")?, "medicines.active")?,
        created_at: parse_timestamp(row.get("created_at")?, "medicines.created_at")?,
        updated_at: parse_timestamp(row.get("updated_at")?, "medicines.updated_at")?,
    })
}

pub(crate) fn parse_medicine_id(value: &str) -> RepoResult<MedicineId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in medicines.id")))
}

fn parse_days(value: &str) -> RepoResult<Vec<chrono::Weekday>> {
    let mut days = Vec::new();
    for code in value.split(',').filter(|code| !code.is_empty()) {
        let day = parse_weekday(code).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid weekday `{code}` in medicine_days.day"))
        })?;
        days.push(day);
    }
    normalize_weekdays(&mut days);
    Ok(days)
}
