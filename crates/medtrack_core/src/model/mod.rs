//! Domain model for medicine schedules, inventory and dose tracking.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep enumerated values (time window, status, skip reason) as tagged
//!   variants; text forms exist only at the storage and API edges.
//!
//! # Invariants
//! - Every medicine is identified by a stable `MedicineId`.
//! - Tracking events are append-only; dose states are derived, not stored.

pub mod medicine;
pub mod schedule;
pub mod tracking;
