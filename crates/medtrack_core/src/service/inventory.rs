//! Inventory tracker: dose outcomes that touch stock.
//!
//! # Responsibility
//! - Apply "mark taken" as one unit: decrement stock and append the `taken`
//!   event in the caller's write transaction.
//! - Apply "skip" as an event append only.
//!
//! # Invariants
//! - Both functions run inside an already-open write transaction and never
//!   commit; a failure anywhere leaves the caller free to roll everything back.
//! - A dose that already has a terminal event is rejected before stock moves.
//! - Stock is never clamped; going below zero is a conflict.

use crate::model::medicine::{Medicine, MedicineId};
use crate::model::tracking::{EventKind, NewTrackingEvent, SkipReason, TrackingEvent};
use crate::repo::medicine_repo::{MedicineRepository, SqliteMedicineRepository};
use crate::repo::tracking_repo::{SqliteTrackingRepository, TrackingRepository};
use crate::repo::ConflictKind;
use crate::service::error::{TrackerError, TrackerResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Result of a successful "mark taken".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkTakenResult {
    /// Medicine state after the decrement.
    pub medicine: Medicine,
    pub event: TrackingEvent,
    /// `pills_remaining <= low_stock_threshold` after the decrement.
    pub low_stock: bool,
}

/// Active medicine at or below its low-stock threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockItem {
    pub medicine_id: MedicineId,
    pub name: String,
    pub dosage: String,
    pub pills_remaining: u32,
    pub low_stock_threshold: u32,
    /// Whole doses left at the current `pills_per_dose`.
    pub doses_remaining: u32,
}

impl From<&Medicine> for LowStockItem {
    fn from(value: &Medicine) -> Self {
        Self {
            medicine_id: value.id,
            name: value.name.clone(),
            dosage: value.dosage.clone(),
            pills_remaining: value.pills_remaining,
            low_stock_threshold: value.low_stock_threshold,
            doses_remaining: value.doses_remaining(),
        }
    }
}

/// Records a taken dose of `medicine_id` on `date` in its scheduled window.
pub fn record_taken(
    conn: &Connection,
    medicine_id: MedicineId,
    date: NaiveDate,
    taken_at: DateTime<Utc>,
) -> TrackerResult<MarkTakenResult> {
    let medicines = SqliteMedicineRepository::try_new(conn)?;
    let tracking = SqliteTrackingRepository::try_new(conn)?;

    let medicine = medicines
        .get_medicine(medicine_id)?
        .ok_or(TrackerError::NotFound(medicine_id))?;
    ensure_unresolved(&tracking, &medicine, date)?;

    let remaining = medicines.decrement_pills(medicine_id, medicine.pills_per_dose, taken_at)?;
    let event = tracking.append_event(&NewTrackingEvent {
        medicine_id,
        date,
        time_window: medicine.time_window,
        kind: EventKind::Taken,
        event_timestamp: taken_at,
    })?;

    let medicine = medicines
        .get_medicine(medicine_id)?
        .ok_or(TrackerError::NotFound(medicine_id))?;
    debug_assert_eq!(medicine.pills_remaining, remaining);
    Ok(MarkTakenResult {
        low_stock: medicine.is_low_stock(),
        medicine,
        event,
    })
}

/// Records a skipped dose. Stock is untouched.
pub fn record_skipped(
    conn: &Connection,
    medicine_id: MedicineId,
    date: NaiveDate,
    reason: SkipReason,
    notes: Option<String>,
    skipped_at: DateTime<Utc>,
) -> TrackerResult<TrackingEvent> {
    let medicines = SqliteMedicineRepository::try_new(conn)?;
    let tracking = SqliteTrackingRepository::try_new(conn)?;

    let medicine = medicines
        .get_medicine(medicine_id)?
        .ok_or(TrackerError::NotFound(medicine_id))?;
    ensure_unresolved(&tracking, &medicine, date)?;

    Ok(tracking.append_event(&NewTrackingEvent {
        medicine_id,
        date,
        time_window: medicine.time_window,
        kind: EventKind::Skipped { reason, notes },
        event_timestamp: skipped_at,
    })?)
}

fn ensure_unresolved(
    tracking: &impl TrackingRepository,
    medicine: &Medicine,
    date: NaiveDate,
) -> TrackerResult<()> {
    match tracking.find_event(medicine.id, date, medicine.time_window)? {
        Some(existing) => Err(TrackerError::Conflict(ConflictKind::AlreadyResolved {
            medicine_id: medicine.id,
            date,
            time_window: medicine.time_window,
            status: existing.status,
        })),
        None => Ok(()),
    }
}
