//! Reminder engine: derives dose states from a store snapshot.
//!
//! # Responsibility
//! - Project every scheduled (medicine, window) on a date into a
//!   `DoseInstance` with its derived `DoseState`.
//! - Select the doses a reminder display should surface right now.
//!
//! # Invariants
//! - Pure: output depends only on (snapshot, date, now). Nothing is written,
//!   and the process time zone is never consulted.
//! - Only active medicines scheduled on the date's weekday are projected, and
//!   never for dates before the medicine's creation day.
//! - Output order is window start, then medicine name (case-insensitive),
//!   then id.

use crate::model::medicine::{Medicine, MedicineId};
use crate::model::schedule::{TimeWindow, TimeWindowTable, WindowPhase};
use crate::model::tracking::{DoseInstance, DoseState, DoseStatus, TrackingEvent};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable view of the store used for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DaySnapshot<'a> {
    pub medicines: &'a [Medicine],
    /// Events for the evaluated date(s); others are ignored.
    pub events: &'a [TrackingEvent],
    pub windows: &'a TimeWindowTable,
    /// Offset of the wall clock `now` is expressed in.
    pub utc_offset: FixedOffset,
}

/// A projected dose plus where its window stands at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedDose {
    pub instance: DoseInstance,
    pub phase: WindowPhase,
}

/// Per-day dose counts for a status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodaySummary {
    pub date: NaiveDate,
    /// All dose instances scheduled on the date.
    pub scheduled: u32,
    pub taken: u32,
    pub skipped: u32,
    /// Window open, no event yet.
    pub pending: u32,
    /// Window not started yet.
    pub upcoming: u32,
    pub missed: u32,
    /// Active medicines at or below their low-stock threshold.
    pub low_stock: u32,
}

/// Projects every scheduled dose on `date` as observed at `now`.
pub fn project_day(snapshot: DaySnapshot<'_>, date: NaiveDate, now: NaiveDateTime) -> Vec<ProjectedDose> {
    let resolved = index_events(snapshot.events, date);
    let weekday = date.weekday();

    let mut doses: Vec<ProjectedDose> = snapshot
        .medicines
        .iter()
        .filter(|medicine| medicine.active && medicine.is_scheduled_on(weekday))
        .filter(|medicine| date >= creation_day(medicine, snapshot.utc_offset))
        .map(|medicine| {
            let bounds = snapshot.windows.bounds(medicine.time_window);
            let phase = bounds.phase_at(date, now);
            let state = match resolved.get(&(medicine.id, medicine.time_window)) {
                Some(status) => DoseState::from(*status),
                None if phase == WindowPhase::Closed => DoseState::Missed,
                None => DoseState::Scheduled,
            };
            ProjectedDose {
                instance: DoseInstance {
                    medicine_id: medicine.id,
                    medicine_name: medicine.name.clone(),
                    dosage: medicine.dosage.clone(),
                    with_food: medicine.with_food,
                    date,
                    time_window: medicine.time_window,
                    window: bounds,
                    state,
                },
                phase,
            }
        })
        .collect();

    doses.sort_by(|left, right| {
        let left = &left.instance;
        let right = &right.instance;
        left.window
            .start_minute
            .cmp(&right.window.start_minute)
            .then_with(|| {
                left.medicine_name
                    .to_lowercase()
                    .cmp(&right.medicine_name.to_lowercase())
            })
            .then_with(|| left.medicine_id.cmp(&right.medicine_id))
    });
    doses
}

/// Doses needing attention at `now`: open windows without an event
/// (`Scheduled`) and closed windows without an event (`Missed`).
///
/// Windows that have not started and resolved doses are excluded.
pub fn pending_doses(snapshot: DaySnapshot<'_>, date: NaiveDate, now: NaiveDateTime) -> Vec<DoseInstance> {
    project_day(snapshot, date, now)
        .into_iter()
        .filter(|dose| match dose.instance.state {
            DoseState::Scheduled => dose.phase == WindowPhase::Open,
            DoseState::Missed => true,
            DoseState::Taken | DoseState::Skipped => false,
        })
        .map(|dose| dose.instance)
        .collect()
}

/// Summarizes one day of doses.
pub fn summarize_day(snapshot: DaySnapshot<'_>, date: NaiveDate, now: NaiveDateTime) -> TodaySummary {
    let mut summary = TodaySummary {
        date,
        scheduled: 0,
        taken: 0,
        skipped: 0,
        pending: 0,
        upcoming: 0,
        missed: 0,
        low_stock: snapshot
            .medicines
            .iter()
            .filter(|medicine| medicine.active && medicine.is_low_stock())
            .count() as u32,
    };

    for dose in project_day(snapshot, date, now) {
        summary.scheduled += 1;
        match (dose.instance.state, dose.phase) {
            (DoseState::Taken, _) => summary.taken += 1,
            (DoseState::Skipped, _) => summary.skipped += 1,
            (DoseState::Missed, _) => summary.missed += 1,
            (DoseState::Scheduled, WindowPhase::Open) => summary.pending += 1,
            (DoseState::Scheduled, _) => summary.upcoming += 1,
        }
    }
    summary
}

/// Calendar day a medicine was created on, in the given offset.
pub fn creation_day(medicine: &Medicine, utc_offset: FixedOffset) -> NaiveDate {
    medicine.created_at.with_timezone(&utc_offset).date_naive()
}

fn index_events(
    events: &[TrackingEvent],
    date: NaiveDate,
) -> HashMap<(MedicineId, TimeWindow), DoseStatus> {
    events
        .iter()
        .filter(|event| event.date == date)
        .map(|event| ((event.medicine_id, event.time_window), event.status))
        .collect()
}
