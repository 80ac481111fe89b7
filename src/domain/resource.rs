//! The resource record and its classification enums.
//!
//! A resource is identified by the digest of its bytes. Everything else on
//! the record (name, tags, origin urls, provenance) is metadata merged in
//! over the lifetime of the record.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse content category. Each domain owns one directory in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDomain {
    Mods,
    Saves,
    ResourcePacks,
    Modpacks,
    ShaderPacks,
    Unknown,
}

impl ResourceDomain {
    /// Every domain, in load order.
    pub const ALL: [ResourceDomain; 6] = [
        ResourceDomain::Mods,
        ResourceDomain::ResourcePacks,
        ResourceDomain::Saves,
        ResourceDomain::Modpacks,
        ResourceDomain::ShaderPacks,
        ResourceDomain::Unknown,
    ];

    /// Default directory name under the library home
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceDomain::Mods => "mods",
            ResourceDomain::Saves => "saves",
            ResourceDomain::ResourcePacks => "resourcepacks",
            ResourceDomain::Modpacks => "modpacks",
            ResourceDomain::ShaderPacks => "shaderpacks",
            ResourceDomain::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ResourceDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for ResourceDomain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "mods" | "mod" => Ok(ResourceDomain::Mods),
            "saves" | "save" => Ok(ResourceDomain::Saves),
            "resourcepacks" | "resourcepack" => Ok(ResourceDomain::ResourcePacks),
            "modpacks" | "modpack" => Ok(ResourceDomain::Modpacks),
            "shaderpacks" | "shaderpack" => Ok(ResourceDomain::ShaderPacks),
            "unknown" => Ok(ResourceDomain::Unknown),
            _ => anyhow::bail!("Unknown resource domain: {}", s),
        }
    }
}

/// Finer-grained format of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Mod,
    ResourcePack,
    Save,
    Modpack,
    ModrinthModpack,
    ShaderPack,
    Unknown,
}

impl ResourceType {
    /// The domain a resource of this type belongs to
    pub fn domain(&self) -> ResourceDomain {
        match self {
            ResourceType::Mod => ResourceDomain::Mods,
            ResourceType::ResourcePack => ResourceDomain::ResourcePacks,
            ResourceType::Save => ResourceDomain::Saves,
            ResourceType::Modpack | ResourceType::ModrinthModpack => ResourceDomain::Modpacks,
            ResourceType::ShaderPack => ResourceDomain::ShaderPacks,
            ResourceType::Unknown => ResourceDomain::Unknown,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceType::Mod => "mod",
            ResourceType::ResourcePack => "resourcepack",
            ResourceType::Save => "save",
            ResourceType::Modpack => "modpack",
            ResourceType::ModrinthModpack => "modrinth-modpack",
            ResourceType::ShaderPack => "shaderpack",
            ResourceType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseforgeSource {
    pub project_id: u64,
    pub file_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthSource {
    pub project_id: String,
    pub version_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubSource {
    pub owner: String,
    pub repo: String,
    pub release: String,
}

/// Provenance sub-records. Each one is optional and merges independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curseforge: Option<CurseforgeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modrinth: Option<ModrinthSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubSource>,
}

impl ResourceSources {
    /// Overlay `other` on top of `self`; fields present in `other` win.
    pub fn overlay(mut self, other: ResourceSources) -> Self {
        if other.curseforge.is_some() {
            self.curseforge = other.curseforge;
        }
        if other.modrinth.is_some() {
            self.modrinth = other.modrinth;
        }
        if other.github.is_some() {
            self.github = other.github;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.curseforge.is_none() && self.modrinth.is_none() && self.github.is_none()
    }
}

/// A resource record, as indexed in memory and persisted by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Content identity (hex digest of the file bytes)
    pub hash: String,

    pub domain: ResourceDomain,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Current readable location; may point outside the library
    pub path: PathBuf,

    /// Location inside canonical storage. Empty until materialized.
    #[serde(default)]
    pub stored_path: PathBuf,

    pub file_name: String,

    /// Origin locators, in insertion order, without duplicates
    #[serde(default)]
    pub uri: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,

    pub name: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(flatten)]
    pub sources: ResourceSources,

    /// Inode of the stored file, when the platform has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,

    #[serde(default)]
    pub size: u64,

    pub imported_at: DateTime<Utc>,
}

impl Resource {
    /// Create an unpersisted record for a parsed file
    pub fn new(
        hash: impl Into<String>,
        resource_type: ResourceType,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        Self {
            hash: hash.into(),
            domain: resource_type.domain(),
            resource_type,
            path,
            stored_path: PathBuf::new(),
            file_name,
            uri: Vec::new(),
            icon_url: None,
            name,
            tags: BTreeSet::new(),
            sources: ResourceSources::default(),
            ino: None,
            size: 0,
            imported_at: Utc::now(),
        }
    }

    /// Whether the record owns a file in canonical storage
    pub fn is_persisted(&self) -> bool {
        !self.stored_path.as_os_str().is_empty()
    }

    /// Append origin locators, keeping insertion order and skipping duplicates.
    /// Returns true when anything was added.
    pub fn merge_uri<I, S>(&mut self, urls: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut changed = false;
        for url in urls {
            let url = url.into();
            if !self.uri.contains(&url) {
                self.uri.push(url);
                changed = true;
            }
        }
        changed
    }

    /// Prepend origin locators (freshly parsed records list the caller's urls first)
    pub fn prepend_uri(&mut self, urls: &[String]) {
        let mut merged: Vec<String> = Vec::with_capacity(urls.len() + self.uri.len());
        for url in urls.iter().chain(self.uri.iter()) {
            if !merged.contains(url) {
                merged.push(url.clone());
            }
        }
        self.uri = merged;
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_uri(mut self, url: impl Into<String>) -> Self {
        self.merge_uri([url.into()]);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_to_domain() {
        assert_eq!(ResourceType::Mod.domain(), ResourceDomain::Mods);
        assert_eq!(ResourceType::ModrinthModpack.domain(), ResourceDomain::Modpacks);
        assert_eq!(ResourceType::Unknown.domain(), ResourceDomain::Unknown);
    }

    #[test]
    fn test_domain_from_str() {
        assert_eq!("mods".parse::<ResourceDomain>().unwrap(), ResourceDomain::Mods);
        assert_eq!("Saves".parse::<ResourceDomain>().unwrap(), ResourceDomain::Saves);
        assert_eq!(
            "resourcepack".parse::<ResourceDomain>().unwrap(),
            ResourceDomain::ResourcePacks
        );
        assert!("textures".parse::<ResourceDomain>().is_err());
    }

    #[test]
    fn test_new_derives_names_from_path() {
        let resource = Resource::new("abc123", ResourceType::Mod, "/tmp/dl/mymod.jar");
        assert_eq!(resource.file_name, "mymod.jar");
        assert_eq!(resource.name, "mymod");
        assert_eq!(resource.domain, ResourceDomain::Mods);
        assert!(!resource.is_persisted());
    }

    #[test]
    fn test_merge_uri_skips_duplicates() {
        let mut resource = Resource::new("abc123", ResourceType::Mod, "/tmp/mymod.jar")
            .with_uri("https://a.example/mymod.jar");

        assert!(resource.merge_uri(["https://b.example/mymod.jar", "https://a.example/mymod.jar"]));
        assert!(!resource.merge_uri(["https://b.example/mymod.jar"]));
        assert_eq!(
            resource.uri,
            vec!["https://a.example/mymod.jar", "https://b.example/mymod.jar"]
        );
    }

    #[test]
    fn test_prepend_uri_keeps_caller_urls_first() {
        let mut resource = Resource::new("abc123", ResourceType::Mod, "/tmp/mymod.jar")
            .with_uri("file:///tmp/mymod.jar");
        resource.prepend_uri(&["https://cdn.example/mymod.jar".to_string()]);
        assert_eq!(resource.uri[0], "https://cdn.example/mymod.jar");
        assert_eq!(resource.uri.len(), 2);
    }

    #[test]
    fn test_sources_overlay() {
        let base = ResourceSources {
            curseforge: Some(CurseforgeSource { project_id: 1, file_id: 2 }),
            ..Default::default()
        };
        let merged = base.overlay(ResourceSources {
            modrinth: Some(ModrinthSource {
                project_id: "P".into(),
                version_id: "V".into(),
            }),
            ..Default::default()
        });
        assert!(merged.curseforge.is_some());
        assert!(merged.modrinth.is_some());
        assert!(merged.github.is_none());
    }

    #[test]
    fn test_record_serialization_flattens_sources() {
        let mut resource = Resource::new("abc123", ResourceType::Mod, "/tmp/mymod.jar");
        resource.sources.curseforge = Some(CurseforgeSource { project_id: 7, file_id: 9 });

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["curseforge"]["projectId"], 7);
        assert_eq!(json["type"], "mod");
        assert_eq!(json["domain"], "mods");

        let parsed: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, resource);
    }
}
