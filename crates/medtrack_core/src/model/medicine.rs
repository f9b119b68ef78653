//! Medicine domain model and input validation.
//!
//! # Responsibility
//! - Define the persisted medicine record and its schedule fields.
//! - Turn loosely typed caller input (`MedicineSpec`) into a validated
//!   `MedicineDraft` with tagged time window and weekday values.
//!
//! # Invariants
//! - `id` is stable and never reused for another medicine.
//! - `pills_per_dose >= 1`, and a medicine is scheduled on at least one weekday.
//! - Validation happens once, at the boundary; storage only sees drafts.

use crate::model::schedule::{normalize_weekdays, parse_weekday, weekday_code, TimeWindow};
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a medicine.
pub type MedicineId = Uuid;

pub const NAME_MAX_CHARS: usize = 50;
pub const DOSAGE_MAX_CHARS: usize = 20;
pub const NOTES_MAX_CHARS: usize = 100;
pub const PILLS_REMAINING_MAX: i64 = 1000;
pub const PILLS_PER_DOSE_MAX: i64 = 10;
pub const LOW_STOCK_THRESHOLD_MAX: i64 = 100;

/// Persisted medicine record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub id: MedicineId,
    pub name: String,
    /// Free-text dosage, e.g. `"10mg"`.
    pub dosage: String,
    pub time_window: TimeWindow,
    /// Scheduled weekdays, Monday first, no duplicates.
    pub days: Vec<Weekday>,
    pub with_food: bool,
    pub pills_remaining: u32,
    pub pills_per_dose: u32,
    pub low_stock_threshold: u32,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Medicine {
    /// `pills_remaining <= low_stock_threshold`.
    pub fn is_low_stock(&self) -> bool {
        self.pills_remaining <= self.low_stock_threshold
    }

    pub fn is_scheduled_on(&self, day: Weekday) -> bool {
        self.days.contains(&day)
    }

    /// Whole doses left at the current `pills_per_dose`.
    pub fn doses_remaining(&self) -> u32 {
        self.pills_remaining / self.pills_per_dose.max(1)
    }
}

/// Caller-supplied medicine fields, as received from the API layer.
///
/// Enumerated fields arrive as text and numbers as signed integers so that
/// malformed input surfaces as a field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineSpec {
    pub name: String,
    pub dosage: String,
    pub time_window: String,
    pub days: Vec<String>,
    #[serde(default)]
    pub with_food: bool,
    pub pills_remaining: i64,
    #[serde(default = "default_pills_per_dose")]
    pub pills_per_dose: i64,
    #[serde(default)]
    pub low_stock_threshold: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_pills_per_dose() -> i64 {
    1
}

fn default_active() -> bool {
    true
}

/// Partial medicine update. `None` keeps the stored value; `notes: Some("")`
/// clears the notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicinePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub time_window: Option<String>,
    #[serde(default)]
    pub days: Option<Vec<String>>,
    #[serde(default)]
    pub with_food: Option<bool>,
    #[serde(default)]
    pub pills_remaining: Option<i64>,
    #[serde(default)]
    pub pills_per_dose: Option<i64>,
    #[serde(default)]
    pub low_stock_threshold: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl MedicinePatch {
    /// Merges the patch onto `current`, producing a full spec that still has
    /// to pass [`MedicineSpec::validate`].
    pub fn merge_onto(&self, current: &Medicine) -> MedicineSpec {
        MedicineSpec {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            dosage: self.dosage.clone().unwrap_or_else(|| current.dosage.clone()),
            time_window: self
                .time_window
                .clone()
                .unwrap_or_else(|| current.time_window.code().to_string()),
            days: self.days.clone().unwrap_or_else(|| {
                current
                    .days
                    .iter()
                    .map(|day| weekday_code(*day).to_string())
                    .collect()
            }),
            with_food: self.with_food.unwrap_or(current.with_food),
            pills_remaining: self
                .pills_remaining
                .unwrap_or_else(|| i64::from(current.pills_remaining)),
            pills_per_dose: self
                .pills_per_dose
                .unwrap_or_else(|| i64::from(current.pills_per_dose)),
            low_stock_threshold: self
                .low_stock_threshold
                .unwrap_or_else(|| i64::from(current.low_stock_threshold)),
            notes: self.notes.clone().or_else(|| current.notes.clone()),
            active: self.active.unwrap_or(current.active),
        }
    }
}

/// Validated medicine fields ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicineDraft {
    pub name: String,
    pub dosage: String,
    pub time_window: TimeWindow,
    pub days: Vec<Weekday>,
    pub with_food: bool,
    pub pills_remaining: u32,
    pub pills_per_dose: u32,
    pub low_stock_threshold: u32,
    pub notes: Option<String>,
    pub active: bool,
}

/// Field-level validation failure for medicine input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MedicineValidationError {
    /// Required text field is empty after trimming.
    Empty(&'static str),
    TooLong {
        field: &'static str,
        max_chars: usize,
    },
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        actual: i64,
    },
    UnknownTimeWindow(String),
    UnknownWeekday(String),
    /// No weekday selected.
    NoWeekdays,
}

impl MedicineValidationError {
    /// Name of the offending input field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty(field) => field,
            Self::TooLong { field, .. } => field,
            Self::OutOfRange { field, .. } => field,
            Self::UnknownTimeWindow(_) => "time_window",
            Self::UnknownWeekday(_) | Self::NoWeekdays => "days",
        }
    }
}

impl Display for MedicineValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty(field) => write!(f, "`{field}` must not be empty"),
            Self::TooLong { field, max_chars } => {
                write!(f, "`{field}` must be at most {max_chars} characters")
            }
            Self::OutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(f, "`{field}` must be between {min} and {max}, got {actual}"),
            Self::UnknownTimeWindow(value) => write!(
                f,
                "unknown time window `{value}`; expected morning|afternoon|evening|night"
            ),
            Self::UnknownWeekday(value) => write!(f, "unknown weekday `{value}`"),
            Self::NoWeekdays => write!(f, "at least one weekday must be scheduled"),
        }
    }
}

impl Error for MedicineValidationError {}

impl MedicineSpec {
    /// Validates all fields and produces a typed draft.
    ///
    /// Text fields are trimmed; empty notes collapse to `None`.
    pub fn validate(&self) -> Result<MedicineDraft, MedicineValidationError> {
        let name = required_text("name", &self.name, NAME_MAX_CHARS)?;
        let dosage = required_text("dosage", &self.dosage, DOSAGE_MAX_CHARS)?;

        let time_window = TimeWindow::from_code(&self.time_window)
            .ok_or_else(|| MedicineValidationError::UnknownTimeWindow(self.time_window.clone()))?;

        let mut days = Vec::with_capacity(self.days.len());
        for value in &self.days {
            let day = parse_weekday(value)
                .ok_or_else(|| MedicineValidationError::UnknownWeekday(value.clone()))?;
            days.push(day);
        }
        normalize_weekdays(&mut days);
        if days.is_empty() {
            return Err(MedicineValidationError::NoWeekdays);
        }

        let notes = match self.notes.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(value) => {
                if value.chars().count() > NOTES_MAX_CHARS {
                    return Err(MedicineValidationError::TooLong {
                        field: "notes",
                        max_chars: NOTES_MAX_CHARS,
                    });
                }
                Some(value.to_string())
            }
        };

        Ok(MedicineDraft {
            name,
            dosage,
            time_window,
            days,
            with_food: self.with_food,
            pills_remaining: bounded("pills_remaining", self.pills_remaining, 0, PILLS_REMAINING_MAX)?,
            pills_per_dose: bounded("pills_per_dose", self.pills_per_dose, 1, PILLS_PER_DOSE_MAX)?,
            low_stock_threshold: bounded(
                "low_stock_threshold",
                self.low_stock_threshold,
                0,
                LOW_STOCK_THRESHOLD_MAX,
            )?,
            notes,
            active: self.active,
        })
    }
}

fn required_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<String, MedicineValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MedicineValidationError::Empty(field));
    }
    if trimmed.chars().count() > max_chars {
        return Err(MedicineValidationError::TooLong { field, max_chars });
    }
    Ok(trimmed.to_string())
}

fn bounded(field: &'static str, value: i64, min: i64, max: i64) -> Result<u32, MedicineValidationError> {
    if value < min || value > max {
        return Err(MedicineValidationError::OutOfRange {
            field,
            min,
            max,
            actual: value,
        });
    }
    // max bounds above are far below u32::MAX
    Ok(value as u32)
}
