//! Core domain logic for household medicine tracking.
//! This crate is the single source of truth for dose, inventory and
//! adherence invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, TrackerConfig};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::medicine::{
    Medicine, MedicineId, MedicinePatch, MedicineSpec, MedicineValidationError,
};
pub use model::schedule::{TimeWindow, TimeWindowTable, WindowBounds};
pub use model::tracking::{
    DoseInstance, DoseState, DoseStatus, SkipReason, SkipRecord, TrackingEvent, TrackingRecord,
};
pub use repo::{ConflictKind, RepoError};
pub use service::adherence::{AdherenceQuery, AdherenceReport, DayAdherence};
pub use service::error::{TrackerError, TrackerResult};
pub use service::inventory::{LowStockItem, MarkTakenResult};
pub use service::reminder::TodaySummary;
pub use service::tracker::{
    BatchOutcome, DeletedMedicine, HistoryQuery, MedicineQuery, MedicineTracker, Paged,
    TrackerOptions,
};
pub use service::transaction::RetryPolicy;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
