//! Tracker facade: the operation set used by API layers and pollers.
//!
//! # Responsibility
//! - Validate caller input at the boundary and translate it into typed values.
//! - Run every operation in exactly one store transaction: mutations in an
//!   immediate (single-writer) transaction that also bumps the version, reads
//!   in a deferred snapshot transaction.
//! - Retry lock contention with bounded backoff.
//!
//! # Invariants
//! - Safe to share across threads (`MedicineTracker: Send + Sync`); spawns no
//!   threads and runs no background work.
//! - File-backed trackers read on a separate connection, so WAL readers never
//!   wait on the writer.
//! - All reads of one tracker share that single reader connection and run one
//!   at a time; concurrent pollers and API reads queue behind each other.
//! - A failed operation commits nothing and leaves the version unchanged.

use crate::config::TrackerConfig;
use crate::db::{open_db_in_memory, open_db_with, OpenOptions};
use crate::model::medicine::{Medicine, MedicineId, MedicinePatch, MedicineSpec};
use crate::model::schedule::{TimeWindow, TimeWindowTable};
use crate::model::tracking::{
    DoseInstance, DoseStatus, SkipReason, SkipRecord, TrackingEvent, TrackingFilter,
    TrackingRecord, SKIP_NOTES_MAX_CHARS,
};
use crate::repo::medicine_repo::{MedicineListQuery, MedicineRepository, SqliteMedicineRepository};
use crate::repo::metadata_repo::SqliteMetadataRepository;
use crate::repo::tracking_repo::{SqliteTrackingRepository, TrackingRepository};
use crate::service::adherence::{build_report, resolve_range, AdherenceQuery, AdherenceReport};
use crate::service::error::{TrackerError, TrackerResult};
use crate::service::inventory::{record_skipped, record_taken, LowStockItem, MarkTakenResult};
use crate::service::reminder::{pending_doses, summarize_day, DaySnapshot, TodaySummary};
use crate::service::sync::SyncCoordinator;
use crate::service::transaction::{run_read, run_with_retry, run_write, RetryPolicy};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const PER_PAGE_DEFAULT: u32 = 20;
pub const PER_PAGE_MAX: u32 = 100;
pub const BATCH_MAX_IDS: usize = 20;

/// Open-time settings for a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
    /// Persisted into `time_windows` at open.
    pub windows: TimeWindowTable,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            busy_timeout: OpenOptions::default().busy_timeout,
            retry: RetryPolicy::default(),
            windows: TimeWindowTable::default(),
        }
    }
}

/// Filter and page for `list_medicines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineQuery {
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub low_stock_only: bool,
    /// 1-based; `0` is treated as `1`.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Clamped to `1..=PER_PAGE_MAX`.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    PER_PAGE_DEFAULT
}

impl Default for MedicineQuery {
    fn default() -> Self {
        Self {
            include_inactive: false,
            time_window: None,
            low_stock_only: false,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Date-range filter for history queries. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub medicine_id: Option<MedicineId>,
    /// `None` returns every match.
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Acknowledgement of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedMedicine {
    pub medicine_id: MedicineId,
    pub tracking_events_removed: u64,
}

/// Per-medicine outcome of `mark_taken_batch`.
#[derive(Debug)]
pub struct BatchOutcome {
    pub medicine_id: MedicineId,
    pub result: TrackerResult<MarkTakenResult>,
}

/// Entry point into the medicine tracking core.
pub struct MedicineTracker {
    writer: Mutex<Connection>,
    /// `None` for in-memory stores, which cannot share a second connection.
    reader: Option<Mutex<Connection>>,
    retry: RetryPolicy,
    sync: SyncCoordinator,
}

impl MedicineTracker {
    /// Opens (or creates) the database file with default options.
    pub fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        Self::open_with(path, TrackerOptions::default())
    }

    /// Opens (or creates) the database file.
    ///
    /// # Side effects
    /// - Applies pending migrations.
    /// - Persists `options.windows`, bumping the version if they changed.
    pub fn open_with(path: impl AsRef<Path>, options: TrackerOptions) -> TrackerResult<Self> {
        options.windows.validate()?;
        let path = path.as_ref();
        let open_options = OpenOptions {
            busy_timeout: options.busy_timeout,
        };
        let writer = open_db_with(path, open_options)?;
        let reader = open_db_with(path, open_options)?;
        Self::bootstrap(writer, Some(reader), options)
    }

    /// Opens a private in-memory store with default options.
    pub fn open_in_memory() -> TrackerResult<Self> {
        Self::open_in_memory_with(TrackerOptions::default())
    }

    pub fn open_in_memory_with(options: TrackerOptions) -> TrackerResult<Self> {
        options.windows.validate()?;
        let writer = open_db_in_memory()?;
        Self::bootstrap(writer, None, options)
    }

    /// Opens the database named by `config.storage.db_path`.
    pub fn from_config(config: &TrackerConfig) -> TrackerResult<Self> {
        let options = config.tracker_options()?;
        Self::open_with(&config.storage.db_path, options)
    }

    fn bootstrap(
        writer: Connection,
        reader: Option<Connection>,
        options: TrackerOptions,
    ) -> TrackerResult<Self> {
        let tracker = Self {
            writer: Mutex::new(writer),
            reader: reader.map(Mutex::new),
            retry: options.retry,
            sync: SyncCoordinator::default(),
        };
        tracker.sync_time_windows(&options.windows)?;
        let version = tracker.current_version()?;
        info!("event=tracker_open module=tracker status=ok version={version}");
        Ok(tracker)
    }

    /// Writes `windows` unless the stored table already matches.
    fn sync_time_windows(&self, windows: &TimeWindowTable) -> TrackerResult<()> {
        run_with_retry(&self.retry, "sync_time_windows", || {
            let mut conn = lock(&self.writer);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let repo = SqliteMetadataRepository::try_new(&tx)?;
            if repo.load_time_windows()? == *windows {
                tx.finish()?;
                return Ok(());
            }
            repo.store_time_windows(windows)?;
            let version = self.sync.bump(&tx)?;
            tx.commit()?;
            self.sync.publish(version);
            info!("event=time_windows_sync module=tracker status=updated version={version}");
            Ok(())
        })
    }

    // ---- medicines ----

    /// Validates `spec` and stores a new medicine.
    pub fn add_medicine(&self, spec: &MedicineSpec) -> TrackerResult<Medicine> {
        let draft = spec.validate()?;
        self.write("add_medicine", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            Ok(repo.create_medicine(&draft, Utc::now())?)
        })
    }

    /// Replaces every field of an existing medicine.
    pub fn update_medicine(&self, id: MedicineId, spec: &MedicineSpec) -> TrackerResult<Medicine> {
        let draft = spec.validate()?;
        self.write("update_medicine", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            Ok(repo.update_medicine(id, &draft, Utc::now())?)
        })
    }

    /// Applies the fields set in `patch` to the stored medicine.
    ///
    /// The merge happens inside the write transaction, so stock changes
    /// committed since the caller last read the medicine are kept.
    pub fn patch_medicine(&self, id: MedicineId, patch: &MedicinePatch) -> TrackerResult<Medicine> {
        self.write("patch_medicine", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            let current = repo.get_medicine(id)?.ok_or(TrackerError::NotFound(id))?;
            let draft = patch.merge_onto(&current).validate()?;
            Ok(repo.update_medicine(id, &draft, Utc::now())?)
        })
    }

    /// Deletes a medicine together with its schedule and tracking history.
    pub fn delete_medicine(&self, id: MedicineId) -> TrackerResult<DeletedMedicine> {
        self.write("delete_medicine", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            let removed = repo.delete_medicine(id)?;
            Ok(DeletedMedicine {
                medicine_id: id,
                tracking_events_removed: removed,
            })
        })
    }

    pub fn get_medicine(&self, id: MedicineId) -> TrackerResult<Medicine> {
        self.read("get_medicine", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            repo.get_medicine(id)?.ok_or(TrackerError::NotFound(id))
        })
    }

    /// Lists medicines by name, one page at a time.
    pub fn list_medicines(&self, query: &MedicineQuery) -> TrackerResult<Paged<Medicine>> {
        let page = query.page.max(1);
        let per_page = query.per_page.clamp(1, PER_PAGE_MAX);
        let list_query = MedicineListQuery {
            include_inactive: query.include_inactive,
            time_window: query.time_window,
            low_stock_only: query.low_stock_only,
            limit: Some(per_page),
            offset: (page - 1).saturating_mul(per_page),
        };

        self.read("list_medicines", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            Ok(Paged {
                total: repo.count_medicines(&list_query)?,
                items: repo.list_medicines(&list_query)?,
                page,
                per_page,
            })
        })
    }

    /// Active medicines at or below their threshold, fewest doses left first.
    pub fn list_low_stock(&self) -> TrackerResult<Vec<LowStockItem>> {
        let query = MedicineListQuery {
            low_stock_only: true,
            ..MedicineListQuery::default()
        };
        let mut items: Vec<LowStockItem> = self.read("list_low_stock", |tx| {
            let repo = SqliteMedicineRepository::try_new(tx)?;
            Ok(repo.list_medicines(&query)?.iter().map(LowStockItem::from).collect())
        })?;
        // Stable sort keeps name order among equal counts.
        items.sort_by_key(|item| item.doses_remaining);
        Ok(items)
    }

    // ---- reminders ----

    /// Doses to surface on `date` at wall-clock `time`: open windows without
    /// an event (`Scheduled`) and closed windows without one (`Missed`).
    pub fn get_pending_doses(
        &self,
        date: NaiveDate,
        time: NaiveTime,
    ) -> TrackerResult<Vec<DoseInstance>> {
        let now = date.and_time(time);
        self.read("get_pending_doses", |tx| {
            let day = load_day(tx, date)?;
            Ok(pending_doses(day.snapshot(), date, now))
        })
    }

    /// Dose counts for `date` at wall-clock `time`.
    pub fn get_today_summary(&self, date: NaiveDate, time: NaiveTime) -> TrackerResult<TodaySummary> {
        let now = date.and_time(time);
        self.read("get_today_summary", |tx| {
            let day = load_day(tx, date)?;
            Ok(summarize_day(day.snapshot(), date, now))
        })
    }

    // ---- dose outcomes ----

    /// Marks today's dose of `id` as taken, now.
    pub fn mark_taken(&self, id: MedicineId) -> TrackerResult<MarkTakenResult> {
        self.mark_taken_at(id, Local::now().fixed_offset())
    }

    /// Marks the dose of `id` on the calendar date of `at` as taken.
    ///
    /// Accepted even after the window closed; the event is recorded against
    /// the medicine's window on that date.
    pub fn mark_taken_at(
        &self,
        id: MedicineId,
        at: DateTime<FixedOffset>,
    ) -> TrackerResult<MarkTakenResult> {
        let date = at.date_naive();
        let taken_at = at.with_timezone(&Utc);
        let outcome = self.write("mark_taken", |tx| record_taken(tx, id, date, taken_at))?;
        if outcome.low_stock {
            warn!(
                "event=low_stock module=tracker status=ok medicine_id={} pills_remaining={} threshold={}",
                id, outcome.medicine.pills_remaining, outcome.medicine.low_stock_threshold
            );
        }
        Ok(outcome)
    }

    /// Marks up to `BATCH_MAX_IDS` medicines as taken, each in its own
    /// transaction. One failure does not undo the others.
    pub fn mark_taken_batch(&self, ids: &[MedicineId]) -> TrackerResult<Vec<BatchOutcome>> {
        if ids.is_empty() || ids.len() > BATCH_MAX_IDS {
            return Err(TrackerError::validation(
                "medicine_ids",
                format!("expected 1 to {BATCH_MAX_IDS} ids, got {}", ids.len()),
            ));
        }

        let at = Local::now().fixed_offset();
        Ok(ids
            .iter()
            .map(|id| BatchOutcome {
                medicine_id: *id,
                result: self.mark_taken_at(*id, at),
            })
            .collect())
    }

    /// Skips today's dose of `id`, now.
    pub fn skip(
        &self,
        id: MedicineId,
        reason: &str,
        notes: Option<&str>,
    ) -> TrackerResult<TrackingEvent> {
        self.skip_at(id, reason, notes, Local::now().fixed_offset())
    }

    /// Skips the dose of `id` on the calendar date of `at`.
    ///
    /// `reason` accepts a code (`out_of_stock`) or a label (`Out of stock`).
    pub fn skip_at(
        &self,
        id: MedicineId,
        reason: &str,
        notes: Option<&str>,
        at: DateTime<FixedOffset>,
    ) -> TrackerResult<TrackingEvent> {
        let reason = SkipReason::parse(reason).ok_or_else(|| {
            TrackerError::validation(
                "reason",
                format!(
                    "unknown skip reason `{}`; expected forgot|side_effects|out_of_stock|doctor_advised|other",
                    reason.trim()
                ),
            )
        })?;
        let notes = normalize_skip_notes(notes)?;
        let date = at.date_naive();
        let skipped_at = at.with_timezone(&Utc);

        self.write("skip", |tx| {
            record_skipped(tx, id, date, reason, notes.clone(), skipped_at)
        })
    }

    // ---- history and stats ----

    /// Skipped doses, newest first.
    pub fn get_skip_history(&self, query: &HistoryQuery) -> TrackerResult<Vec<SkipRecord>> {
        let filter = history_filter(query, Some(DoseStatus::Skipped))?;
        let records = self.read("get_skip_history", |tx| {
            let repo = SqliteTrackingRepository::try_new(tx)?;
            Ok(repo.list_records(&filter, query.limit)?)
        })?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let reason = record.event.skip_reason?;
                Some(SkipRecord {
                    medicine_id: record.event.medicine_id,
                    medicine_name: record.medicine_name,
                    dosage: record.dosage,
                    date: record.event.date,
                    time_window: record.event.time_window,
                    reason,
                    notes: record.event.skip_notes,
                    skipped_at: record.event.event_timestamp,
                })
            })
            .collect())
    }

    /// All tracking events (taken and skipped), newest first.
    pub fn get_tracking_history(&self, query: &HistoryQuery) -> TrackerResult<Vec<TrackingRecord>> {
        let filter = history_filter(query, None)?;
        self.read("get_tracking_history", |tx| {
            let repo = SqliteTrackingRepository::try_new(tx)?;
            Ok(repo.list_records(&filter, query.limit)?)
        })
    }

    /// Adherence over the query range, observed now.
    pub fn get_adherence_stats(&self, query: &AdherenceQuery) -> TrackerResult<AdherenceReport> {
        self.get_adherence_stats_as_of(query, Local::now().naive_local())
    }

    /// Adherence over the query range, with Missed projected as of `now`.
    pub fn get_adherence_stats_as_of(
        &self,
        query: &AdherenceQuery,
        now: NaiveDateTime,
    ) -> TrackerResult<AdherenceReport> {
        let (start, end) = resolve_range(query, now.date())
            .map_err(|message| TrackerError::validation("date_range", message))?;

        self.read("get_adherence_stats", |tx| {
            let medicines_repo = SqliteMedicineRepository::try_new(tx)?;
            let tracking_repo = SqliteTrackingRepository::try_new(tx)?;
            let windows = SqliteMetadataRepository::try_new(tx)?.load_time_windows()?;

            let medicines: Vec<Medicine> = match query.medicine_id {
                Some(id) => medicines_repo.get_medicine(id)?.into_iter().collect(),
                None => medicines_repo.list_medicines(&MedicineListQuery {
                    include_inactive: true,
                    ..MedicineListQuery::default()
                })?,
            };
            let events = tracking_repo.list_events(&TrackingFilter {
                medicine_id: query.medicine_id,
                start_date: Some(start),
                end_date: Some(end),
                status: None,
            })?;

            let snapshot = DaySnapshot {
                medicines: &medicines,
                events: &events,
                windows: &windows,
                utc_offset: local_offset(),
            };
            Ok(build_report(
                snapshot,
                start,
                end,
                query.medicine_id,
                now,
            ))
        })
    }

    // ---- versioning ----

    /// Committed store version, read from storage. Exact across processes.
    pub fn current_version(&self) -> TrackerResult<u64> {
        self.read("current_version", |tx| self.sync.read(tx))
    }

    /// True when the committed version differs from `version`.
    pub fn has_changed_since(&self, version: u64) -> TrackerResult<bool> {
        Ok(self.current_version()? != version)
    }

    /// Highest version this process has committed or read, without touching
    /// storage. May lag behind other processes.
    pub fn last_observed_version(&self) -> u64 {
        self.sync.last_observed()
    }

    /// Window bounds currently persisted in the store.
    pub fn time_windows(&self) -> TrackerResult<TimeWindowTable> {
        self.read("time_windows", |tx| {
            Ok(SqliteMetadataRepository::try_new(tx)?.load_time_windows()?)
        })
    }

    // ---- transaction plumbing ----

    fn write<T>(
        &self,
        operation: &'static str,
        f: impl Fn(&Transaction<'_>) -> TrackerResult<T>,
    ) -> TrackerResult<T> {
        let started_at = Instant::now();
        let result = run_with_retry(&self.retry, operation, || {
            let mut conn = lock(&self.writer);
            run_write(&mut conn, &self.sync, &f)
        });

        match result {
            Ok((value, version)) => {
                info!(
                    "event={} module=tracker status=ok duration_ms={} version={}",
                    operation,
                    started_at.elapsed().as_millis(),
                    version
                );
                Ok(value)
            }
            Err(err) => {
                log_failure(operation, started_at, &err);
                Err(err)
            }
        }
    }

    fn read<T>(
        &self,
        operation: &'static str,
        f: impl Fn(&Transaction<'_>) -> TrackerResult<T>,
    ) -> TrackerResult<T> {
        let started_at = Instant::now();
        let connection = self.reader.as_ref().unwrap_or(&self.writer);
        let result = run_with_retry(&self.retry, operation, || {
            let mut conn = lock(connection);
            run_read(&mut conn, &f)
        });

        match &result {
            Ok(_) => debug!(
                "event={} module=tracker status=ok duration_ms={}",
                operation,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure(operation, started_at, err),
        }
        result
    }
}

/// Store state needed to evaluate one day.
struct DayState {
    medicines: Vec<Medicine>,
    events: Vec<TrackingEvent>,
    windows: TimeWindowTable,
}

impl DayState {
    fn snapshot(&self) -> DaySnapshot<'_> {
        DaySnapshot {
            medicines: &self.medicines,
            events: &self.events,
            windows: &self.windows,
            utc_offset: local_offset(),
        }
    }
}

/// Offset of the wall clock callers pass as `now`.
fn local_offset() -> FixedOffset {
    *Local::now().offset()
}

fn load_day(conn: &Connection, date: NaiveDate) -> TrackerResult<DayState> {
    let medicines = SqliteMedicineRepository::try_new(conn)?.list_medicines(&MedicineListQuery::default())?;
    let events = SqliteTrackingRepository::try_new(conn)?.list_events(&TrackingFilter {
        start_date: Some(date),
        end_date: Some(date),
        ..TrackingFilter::default()
    })?;
    let windows = SqliteMetadataRepository::try_new(conn)?.load_time_windows()?;
    Ok(DayState {
        medicines,
        events,
        windows,
    })
}

fn history_filter(query: &HistoryQuery, status: Option<DoseStatus>) -> TrackerResult<TrackingFilter> {
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(TrackerError::validation(
                "date_range",
                format!("start date {start} is after end date {end}"),
            ));
        }
    }
    Ok(TrackingFilter {
        medicine_id: query.medicine_id,
        start_date: query.start_date,
        end_date: query.end_date,
        status,
    })
}

fn normalize_skip_notes(notes: Option<&str>) -> TrackerResult<Option<String>> {
    match notes.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if value.chars().count() > SKIP_NOTES_MAX_CHARS => {
            Err(TrackerError::validation(
                "notes",
                format!("must be at most {SKIP_NOTES_MAX_CHARS} characters"),
            ))
        }
        Some(value) => Ok(Some(value.to_string())),
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    // A panic mid-transaction drops (and rolls back) the transaction, so the
    // connection itself is still usable.
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_failure(operation: &'static str, started_at: Instant, err: &TrackerError) {
    let duration_ms = started_at.elapsed().as_millis();
    match err {
        TrackerError::Storage(_) | TrackerError::LockTimeout { .. } | TrackerError::Config(_) => {
            error!(
                "event={} module=tracker status=error duration_ms={} error_code={} error={}",
                operation,
                duration_ms,
                err.code(),
                err
            )
        }
        _ => warn!(
            "event={} module=tracker status=rejected duration_ms={} error_code={}",
            operation,
            duration_ms,
            err.code()
        ),
    }
}
