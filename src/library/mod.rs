//! Storage building blocks for the resource library.
//!
//! # Storage Layout
//!
//! ```text
//! <home>/
//! ├── resources.db              # hash -> record (SQLite key/value table)
//! ├── resource-images/<sha256>  # content-addressed icons
//! ├── mods/                     # one directory per domain
//! │   ├── mymod.jar             # primary file
//! │   ├── mymod.json            # legacy metadata sidecar (migrated on load)
//! │   ├── mymod.png             # cached icon sidecar
//! │   └── other.jar.pending     # copy in progress
//! ├── saves/ resourcepacks/ modpacks/ shaderpacks/ unknown/
//! └── .lock
//! ```

pub mod hasher;
pub mod images;
pub mod index;
pub mod materialize;
pub mod parser;
pub mod store;

pub use hasher::{identify, FileStat, FileType, Identity, DIRECTORY_SENTINEL};
pub use images::{ImageSource, ImageStore};
pub use index::{Query, ResourceIndex, ResourceKey};
pub use materialize::{materialize, MaterializeStrategy, PENDING_SUFFIX};
pub use parser::{ExtensionParser, ParsedResource, ResourceParser};
pub use store::{ResourceStore, SqliteStore};
