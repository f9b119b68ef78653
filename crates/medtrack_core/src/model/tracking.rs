//! Tracking events and derived dose states.
//!
//! # Responsibility
//! - Define the append-only record written when a dose is taken or skipped.
//! - Define the derived per-dose projection (`DoseState`, `DoseInstance`).
//!
//! # Invariants
//! - A `TrackingEvent` is never rewritten once stored.
//! - `skip_reason` is present if and only if `status == Skipped`.
//! - `DoseState::Missed` is computed at query time and never persisted.

use crate::model::medicine::MedicineId;
use crate::model::schedule::{TimeWindow, WindowBounds};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const SKIP_NOTES_MAX_CHARS: usize = 500;

/// Terminal status recorded by a tracking event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Taken,
    Skipped,
}

impl DoseStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Taken => "taken",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        match value {
            "taken" => Some(Self::Taken),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Why a dose was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Forgot,
    SideEffects,
    OutOfStock,
    DoctorAdvised,
    Other,
}

impl SkipReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::Forgot => "forgot",
            Self::SideEffects => "side_effects",
            Self::OutOfStock => "out_of_stock",
            Self::DoctorAdvised => "doctor_advised",
            Self::Other => "other",
        }
    }

    /// Human label shown by the device UI.
    pub fn label(self) -> &'static str {
        match self {
            Self::Forgot => "Forgot",
            Self::SideEffects => "Side effects",
            Self::OutOfStock => "Out of stock",
            Self::DoctorAdvised => "Doctor advised",
            Self::Other => "Other",
        }
    }

    /// Parses a snake_case code or a display label, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "forgot" => Some(Self::Forgot),
            "side_effects" => Some(Self::SideEffects),
            "out_of_stock" => Some(Self::OutOfStock),
            "doctor_advised" => Some(Self::DoctorAdvised),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Outcome carried by a new event; keeps skip data tied to the skipped case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Taken,
    Skipped {
        reason: SkipReason,
        notes: Option<String>,
    },
}

/// Event to append for one (medicine, date, window) dose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrackingEvent {
    pub medicine_id: MedicineId,
    pub date: NaiveDate,
    pub time_window: TimeWindow,
    pub kind: EventKind,
    pub event_timestamp: DateTime<Utc>,
}

/// Stored tracking event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Storage row id; increases with insertion order.
    pub id: i64,
    pub medicine_id: MedicineId,
    pub date: NaiveDate,
    pub time_window: TimeWindow,
    pub status: DoseStatus,
    pub event_timestamp: DateTime<Utc>,
    pub skip_reason: Option<SkipReason>,
    pub skip_notes: Option<String>,
}

/// Event joined with the medicine's display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    #[serde(flatten)]
    pub event: TrackingEvent,
    pub medicine_name: String,
    pub dosage: String,
}

/// Skip-history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub dosage: String,
    pub date: NaiveDate,
    pub time_window: TimeWindow,
    pub reason: SkipReason,
    pub notes: Option<String>,
    pub skipped_at: DateTime<Utc>,
}

/// Filter for tracking-event listings. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingFilter {
    pub medicine_id: Option<MedicineId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<DoseStatus>,
}

/// Derived state of one dose instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseState {
    /// No event yet and the window has not closed.
    Scheduled,
    Taken,
    Skipped,
    /// Window closed with no event.
    Missed,
}

impl From<DoseStatus> for DoseState {
    fn from(value: DoseStatus) -> Self {
        match value {
            DoseStatus::Taken => Self::Taken,
            DoseStatus::Skipped => Self::Skipped,
        }
    }
}

/// One medicine's scheduled window on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseInstance {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub dosage: String,
    pub with_food: bool,
    pub date: NaiveDate,
    pub time_window: TimeWindow,
    pub window: WindowBounds,
    pub state: DoseState,
}
