//! Metadata resolution for a single file.
//!
//! Real format parsers (mod manifests, level.dat, pack.mcmeta) live outside
//! this crate and plug in through [`ResourceParser`]. The built-in
//! [`ExtensionParser`] only looks at the file extension and the caller's hint.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{Resource, ResourceType, Result};

use super::hasher::{FileType, Identity};

/// A parsed but not yet persisted resource
#[derive(Debug, Clone)]
pub struct ParsedResource {
    pub resource: Resource,
    /// Icon bytes extracted from the file, if any
    pub icon: Option<Vec<u8>>,
}

#[async_trait]
pub trait ResourceParser: Send + Sync {
    /// Resolve metadata for `path`. `identity` is already computed by the caller.
    async fn parse(
        &self,
        path: &Path,
        identity: &Identity,
        hint: Option<ResourceType>,
    ) -> Result<ParsedResource>;
}

/// Classifies files by extension alone
#[derive(Debug, Clone, Default)]
pub struct ExtensionParser;

impl ExtensionParser {
    fn classify(path: &Path, identity: &Identity, hint: Option<ResourceType>) -> ResourceType {
        if identity.file_type == FileType::Unknown {
            return hint.unwrap_or(ResourceType::Unknown);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("jar") => ResourceType::Mod,
            Some("mrpack") => ResourceType::ModrinthModpack,
            _ => hint.unwrap_or(ResourceType::Unknown),
        }
    }
}

#[async_trait]
impl ResourceParser for ExtensionParser {
    async fn parse(
        &self,
        path: &Path,
        identity: &Identity,
        hint: Option<ResourceType>,
    ) -> Result<ParsedResource> {
        let resource_type = Self::classify(path, identity, hint);
        let mut resource = Resource::new(identity.content_id.clone(), resource_type, path);
        if let Some(size) = tokio::fs::metadata(path).await.ok().map(|m| m.len()) {
            resource.size = size;
        }
        Ok(ParsedResource {
            resource,
            icon: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceDomain;

    fn identity(file_type: FileType) -> Identity {
        Identity {
            content_id: "abc".into(),
            file_type,
        }
    }

    #[tokio::test]
    async fn test_jar_is_a_mod() {
        let parsed = ExtensionParser
            .parse(Path::new("/dl/mymod.jar"), &identity(FileType::File), None)
            .await
            .unwrap();
        assert_eq!(parsed.resource.resource_type, ResourceType::Mod);
        assert_eq!(parsed.resource.domain, ResourceDomain::Mods);
        assert_eq!(parsed.resource.hash, "abc");
    }

    #[tokio::test]
    async fn test_mrpack_is_a_modpack() {
        let parsed = ExtensionParser
            .parse(Path::new("/dl/pack.mrpack"), &identity(FileType::File), None)
            .await
            .unwrap();
        assert_eq!(parsed.resource.domain, ResourceDomain::Modpacks);
    }

    #[tokio::test]
    async fn test_zip_follows_hint() {
        let zip = Path::new("/dl/world.zip");
        let unhinted = ExtensionParser.parse(zip, &identity(FileType::File), None).await.unwrap();
        assert_eq!(unhinted.resource.domain, ResourceDomain::Unknown);

        let hinted = ExtensionParser
            .parse(zip, &identity(FileType::File), Some(ResourceType::Save))
            .await
            .unwrap();
        assert_eq!(hinted.resource.domain, ResourceDomain::Saves);
    }

    #[tokio::test]
    async fn test_unrecognised_bytes_ignore_extension() {
        let parsed = ExtensionParser
            .parse(Path::new("/dl/fake.jar"), &identity(FileType::Unknown), None)
            .await
            .unwrap();
        assert_eq!(parsed.resource.resource_type, ResourceType::Unknown);
    }
}
