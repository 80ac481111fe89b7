//! Import orchestration.
//!
//! This module contains:
//! - ResourceService: lifecycle, import, update, removal, export
//! - Migration: offline reconciliation of a domain directory on load
//! - Scheduler: bounded admission for foreground imports
//! - Signals: per-domain readiness and single-flight loads

pub mod migrate;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod signal;

// Re-export commonly used types
pub use migrate::MigrationReport;
pub use request::{ImportContext, ImportFailure, ImportManyResult, ImportRequest, UpdateRequest};
pub use scheduler::ImportScheduler;
pub use service::{ImportOutcome, ResourceService};
pub use signal::{Outcome, ReadySignal, SingleFlight};
