//! modshelf - content-addressed library for game resources
//!
//! Keeps a library of user-imported files (mods, world saves, resource
//! packs, modpacks, shader packs) deduplicated by content hash and in sync
//! with the directories it manages.
//!
//! # Architecture
//!
//! Files enter the library through explicit imports or by appearing in a
//! watched domain directory. Both paths converge on one pipeline:
//! - resolve by inode, then by content hash
//! - parse metadata and enforce the domain restriction
//! - materialize into the domain directory
//! - persist to the store, then commit to the in-memory index
//!
//! The watchers ignore filesystem events caused by the importer's own
//! writes. Everything observers care about is sent over one event channel.
//!
//! # Modules
//!
//! - `core`: ResourceService, migration, scheduling
//! - `domain`: Resource record, events, errors
//! - `ingest`: Domain watchers and pending markers
//! - `library`: Hashing, index, store, images, materialization
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Import a mod
//! modshelf import ~/Downloads/sodium.jar --domain mods
//!
//! # List the library
//! modshelf list --domain mods
//!
//! # Keep the library in sync with its directories
//! modshelf watch
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod library;

// Re-export main types at crate root for convenience
pub use config::ResolvedConfig;
pub use core::{ImportManyResult, ImportRequest, ResourceService, UpdateRequest};
pub use domain::{
    Resource, ResourceDomain, ResourceError, ResourceEvent, ResourceSources, ResourceType,
};
pub use library::{ResourceKey, ResourceParser, ResourceStore};
