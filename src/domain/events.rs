//! Notifications emitted by the resource service.
//!
//! The service never calls back into its owner. Everything an observer may
//! care about (commits, removals, asynchronous faults from watchers) is sent
//! over one channel that the owner drains.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::{Resource, ResourceDomain};

/// A single notification from the resource service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// Records were persisted and are now visible in the index
    Committed { resources: Vec<Resource> },

    /// A record was removed from the index and the store
    Removed { resource: Resource },

    /// A modpack was imported and may be installed by the host application
    ModpackImported { path: PathBuf, name: String },

    /// A domain finished its initial scan and migration
    DomainReady { domain: ResourceDomain },

    /// A watcher callback failed; the watcher keeps running
    Fault {
        domain: ResourceDomain,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ResourceEvent {
    pub fn committed(resource: Resource) -> Self {
        Self::Committed {
            resources: vec![resource],
        }
    }

    pub fn fault(domain: ResourceDomain, error: impl std::fmt::Display) -> Self {
        Self::Fault {
            domain,
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::Removed { .. } => "removed",
            Self::ModpackImported { .. } => "modpack_imported",
            Self::DomainReady { .. } => "domain_ready",
            Self::Fault { .. } => "fault",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceType;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ResourceEvent::committed(Resource::new("abc", ResourceType::Mod, "/m/a.jar"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "committed");
        assert_eq!(json["resources"][0]["hash"], "abc");
    }

    #[test]
    fn test_fault_carries_message() {
        let event = ResourceEvent::fault(ResourceDomain::Mods, "disk full");
        match event {
            ResourceEvent::Fault { domain, error, .. } => {
                assert_eq!(domain, ResourceDomain::Mods);
                assert_eq!(error, "disk full");
            }
            other => panic!("Expected fault, got {}", other.label()),
        }
    }
}
