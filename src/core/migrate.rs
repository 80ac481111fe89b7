//! Reconciles a domain directory with the store while its watcher is offline.
//!
//! Runs once per domain during load:
//! 1. stale `.pending` copies from an interrupted import are deleted
//! 2. legacy `<name>.json` metadata sidecars are turned into records
//! 3. untracked primary files are imported (optionally)
//! 4. records whose file vanished from the directory are evicted

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{Resource, ResourceDomain, ResourceSources, ResourceType, Result};
use crate::ingest::ScanResult;
use crate::library::{hasher, ImageSource, ResourceKey};

use super::request::ImportRequest;
use super::service::{ImportOutcome, ResourceService};

/// What a domain migration did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records created from legacy metadata sidecars
    pub migrated: usize,
    /// Untracked files imported
    pub imported: usize,
    /// Records dropped because their file is gone
    pub evicted: usize,
    /// Files that could not be migrated or imported
    pub failed: usize,
}

/// Metadata sidecar written by the legacy per-file storage format
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    resource_type: Option<ResourceType>,
    #[serde(default)]
    domain: Option<ResourceDomain>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    uri: Vec<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(flatten)]
    sources: ResourceSources,
}

pub(crate) async fn migrate_domain(
    service: &ResourceService,
    domain: ResourceDomain,
    scan: &ScanResult,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for pending in &scan.stale_pending {
        debug!("Remove stale pending copy {}", pending.display());
        let _ = tokio::fs::remove_file(pending).await;
    }

    for sidecar in &scan.legacy_metadata {
        if service.is_closed() {
            return Ok(report);
        }
        match migrate_sidecar(service, domain, sidecar, &scan.primaries).await {
            Ok(true) => report.migrated += 1,
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to migrate {}: {}", sidecar.display(), e);
                report.failed += 1;
            }
        }
    }

    for primary in &scan.primaries {
        if service.is_closed() {
            return Ok(report);
        }
        if service
            .index()
            .contains(&ResourceKey::Path(primary.clone()))
        {
            continue;
        }
        let request = ImportRequest::new(primary)
            .restrict_to(domain)
            .optional()
            .background();
        match service.import_outcome(request).await {
            Ok(ImportOutcome::Imported(_)) => report.imported += 1,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to import {}: {}", primary.display(), e);
                report.failed += 1;
            }
        }
    }

    // By directory rather than domain: an upgraded Unknown record keeps its file
    let dir = service.domain_dir(domain);
    for resource in service.index().list(None) {
        if service.is_closed() {
            return Ok(report);
        }
        if resource.stored_path.parent() != Some(dir.as_path()) {
            continue;
        }
        if tokio::fs::try_exists(&resource.stored_path).await.unwrap_or(true) {
            continue;
        }
        debug!(
            "Evict {} as its file is gone",
            resource.stored_path.display()
        );
        service.remove_resource(resource).await?;
        report.evicted += 1;
    }

    Ok(report)
}

/// Returns true when a new record was created from the sidecar
async fn migrate_sidecar(
    service: &ResourceService,
    domain: ResourceDomain,
    sidecar: &Path,
    primaries: &[PathBuf],
) -> Result<bool> {
    let content = tokio::fs::read_to_string(sidecar).await?;
    let legacy: LegacyMetadata = serde_json::from_str(&content)?;

    let Some(primary) = locate_primary(sidecar, legacy.file_name.as_deref(), primaries) else {
        warn!("Skip orphaned metadata {}", sidecar.display());
        return Ok(false);
    };

    let icon = sidecar.with_extension("png");
    let created = if service
        .index()
        .contains(&ResourceKey::Path(primary.clone()))
    {
        false
    } else {
        let identity = hasher::identify(&primary).await?;
        let stat = hasher::stat(&primary).await?;

        let resource_type = legacy.resource_type.unwrap_or(ResourceType::Unknown);
        let mut resource = Resource::new(identity.content_id, resource_type, &primary);
        resource.domain = match legacy.domain.unwrap_or(resource_type.domain()) {
            ResourceDomain::Unknown => domain,
            other => other,
        };
        resource.stored_path = primary.clone();
        resource.ino = stat.ino;
        resource.size = stat.size;
        resource.merge_uri(legacy.uri);
        resource.tags = legacy.tags;
        resource.sources = legacy.sources;
        if let Some(name) = legacy.name {
            resource.name = name;
        }
        resource.icon_url = match legacy.icon_url {
            Some(url) => Some(url),
            None if tokio::fs::try_exists(&icon).await.unwrap_or(false) => {
                Some(service.add_image(ImageSource::from(icon.as_path())).await?)
            }
            None => None,
        };

        service.commit(resource).await?;
        true
    };

    tokio::fs::remove_file(sidecar).await?;
    let _ = tokio::fs::remove_file(&icon).await;
    Ok(created)
}

/// `<dir>/<fileName>` when the sidecar names it, else the primary sharing its stem
fn locate_primary(sidecar: &Path, file_name: Option<&str>, primaries: &[PathBuf]) -> Option<PathBuf> {
    if let Some(name) = file_name {
        let candidate = sidecar.with_file_name(name);
        if primaries.contains(&candidate) {
            return Some(candidate);
        }
    }
    let stem = sidecar.file_stem()?;
    primaries
        .iter()
        .find(|p| p.file_stem() == Some(stem))
        .cloned()
}
