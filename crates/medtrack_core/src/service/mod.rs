//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep API layers and pollers decoupled from storage details.
//!
//! `tracker` is the only entry point external callers need; the other
//! modules are the engines it composes.

pub mod adherence;
pub mod error;
pub mod inventory;
pub mod reminder;
pub mod sync;
pub mod tracker;
pub mod transaction;
