//! Inputs and outputs of the import operations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::domain::{Resource, ResourceDomain, ResourceError, ResourceSources, ResourceType, Result};
use crate::library::hasher::{self, FileStat, Identity};

/// A request to import one file
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub path: PathBuf,
    /// Origin locators to record (download url, project page...)
    pub urls: Vec<String>,
    pub sources: ResourceSources,
    /// Explicit icon reference; wins over any icon found while parsing
    pub icon_url: Option<String>,
    pub tags: BTreeSet<String>,
    pub type_hint: Option<ResourceType>,
    /// Only accept resources of this domain. Unknown resources are coerced.
    pub restrict_to_domain: Option<ResourceDomain>,
    /// With `restrict_to_domain`, silently skip unknown files and directories
    pub optional: bool,
    /// Run immediately instead of waiting for an import slot
    pub background: bool,
}

impl ImportRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !self.urls.contains(&url) {
            self.urls.push(url);
        }
        self
    }

    pub fn sources(mut self, sources: ResourceSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn type_hint(mut self, hint: ResourceType) -> Self {
        self.type_hint = Some(hint);
        self
    }

    pub fn restrict_to(mut self, domain: ResourceDomain) -> Self {
        self.restrict_to_domain = Some(domain);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Apply the caller's metadata to an existing record.
    /// Returns true when the record changed.
    pub(crate) fn merge_into(&self, resource: &mut Resource) -> bool {
        let before = resource.clone();
        resource.merge_uri(self.urls.iter().cloned());
        resource.sources = std::mem::take(&mut resource.sources).overlay(self.sources.clone());
        if let Some(icon) = &self.icon_url {
            resource.icon_url = Some(icon.clone());
        }
        resource.tags.extend(self.tags.iter().cloned());
        *resource != before
    }
}

/// A metadata update for an existing record
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub name: Option<String>,
    /// Replaces the tag set when present
    pub tags: Option<BTreeSet<String>>,
    /// Added to the uri list (never removes)
    pub urls: Vec<String>,
    pub sources: ResourceSources,
    pub icon_url: Option<String>,
}

impl UpdateRequest {
    pub(crate) fn apply(&self, resource: &mut Resource) {
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(tags) = &self.tags {
            resource.tags = tags.clone();
        }
        resource.merge_uri(self.urls.iter().cloned());
        resource.sources = std::mem::take(&mut resource.sources).overlay(self.sources.clone());
        if let Some(icon) = &self.icon_url {
            resource.icon_url = Some(icon.clone());
        }
    }
}

#[derive(Debug)]
pub struct ImportFailure {
    pub path: PathBuf,
    pub error: ResourceError,
}

/// Outcome of a batch import. Failures never abort sibling items.
#[derive(Debug, Default)]
pub struct ImportManyResult {
    /// Records that already existed and were merge-updated
    pub existing: Vec<Resource>,
    /// Newly imported records
    pub imported: Vec<Resource>,
    /// Optional items that were skipped
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<ImportFailure>,
}

impl ImportManyResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.existing.iter().chain(self.imported.iter())
    }
}

/// Per-call cache so the file is stat'ed and hashed at most once
#[derive(Debug)]
pub struct ImportContext {
    path: PathBuf,
    stat: Option<FileStat>,
    identity: Option<Identity>,
}

impl ImportContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stat: None,
            identity: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn stat(&mut self) -> Result<&FileStat> {
        let stat = match self.stat.take() {
            Some(stat) => stat,
            None => hasher::stat(&self.path).await?,
        };
        Ok(self.stat.insert(stat))
    }

    pub async fn identity(&mut self) -> Result<&Identity> {
        let identity = match self.identity.take() {
            Some(identity) => identity,
            None => hasher::identify(&self.path).await?,
        };
        Ok(self.identity.insert(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CurseforgeSource;
    use tempfile::TempDir;

    #[test]
    fn test_merge_is_monotonic() {
        let mut resource = Resource::new("abc", ResourceType::Mod, "/mods/a.jar")
            .with_uri("https://a")
            .with_tag("client");

        let request = ImportRequest::new("/tmp/a.jar")
            .url("https://a")
            .url("https://b")
            .tag("client")
            .sources(ResourceSources {
                curseforge: Some(CurseforgeSource {
                    project_id: 1,
                    file_id: 2,
                }),
                ..Default::default()
            });

        assert!(request.merge_into(&mut resource));
        assert_eq!(resource.uri, vec!["https://a", "https://b"]);
        assert_eq!(resource.tags.len(), 1);
        assert!(resource.sources.curseforge.is_some());

        // nothing new the second time
        assert!(!request.merge_into(&mut resource));
    }

    #[test]
    fn test_update_replaces_tags_but_keeps_uri() {
        let mut resource = Resource::new("abc", ResourceType::Mod, "/mods/a.jar")
            .with_uri("https://a")
            .with_tag("old");

        UpdateRequest {
            name: Some("Renamed".into()),
            tags: Some(BTreeSet::from(["new".to_string()])),
            urls: vec!["https://b".into()],
            ..Default::default()
        }
        .apply(&mut resource);

        assert_eq!(resource.name, "Renamed");
        assert_eq!(resource.tags, BTreeSet::from(["new".to_string()]));
        assert_eq!(resource.uri, vec!["https://a", "https://b"]);
    }

    #[tokio::test]
    async fn test_context_caches_identity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.jar");
        tokio::fs::write(&path, b"PK\x03\x04 first").await.unwrap();

        let mut context = ImportContext::new(&path);
        let first = context.identity().await.unwrap().content_id.clone();

        // changed on disk, but the context keeps what it computed
        tokio::fs::write(&path, b"PK\x03\x04 second").await.unwrap();
        assert_eq!(context.identity().await.unwrap().content_id, first);
        assert!(context.stat().await.unwrap().size > 0);
    }
}
