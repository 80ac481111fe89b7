//! Domain types for the resource library.
//!
//! This module contains the core data structures:
//! - Resource: the content-addressed record and its classification
//! - Events: notifications drained by the service owner
//! - Error: the library error taxonomy

pub mod error;
pub mod events;
pub mod resource;

// Re-export commonly used types
pub use error::{ResourceError, Result};
pub use events::ResourceEvent;
pub use resource::{
    CurseforgeSource, GithubSource, ModrinthSource, Resource, ResourceDomain, ResourceSources,
    ResourceType,
};
