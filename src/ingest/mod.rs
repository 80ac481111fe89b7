//! Reconciliation of domain directories with the library.
//!
//! Files can enter a domain directory two ways: the importer writes them, or
//! something outside the library drops them in. The watcher must import the
//! second kind and ignore the first.
//!
//! # Architecture
//!
//! ```text
//! import() ── mark ──> PendingMarkers <── consume ── DomainWatcher <── notify
//!    │                                                   │
//!    └── materialize into <domain dir> ──> fs event ─────┘
//! ```

pub mod pending;
pub mod watcher;

pub use pending::PendingMarkers;
pub use watcher::{
    changes_from_event, classify_path, DomainChange, DomainEventHandler, DomainWatcher, PathRole,
    ScanResult, WatchHandle, WatcherState, DEFAULT_SETTLE,
};
