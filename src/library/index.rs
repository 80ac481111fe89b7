//! In-memory multi-key index of resource records.
//!
//! One record is reachable through several independent key spaces: its
//! content hash, each origin uri, the inode of its stored file and the
//! stored path itself. All key spaces are updated under a single write lock
//! so readers never observe a half-indexed or half-discarded record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::domain::{Resource, ResourceDomain};

/// A lookup key in any of the index key spaces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Hash(String),
    Uri(String),
    Ino(u64),
    Path(PathBuf),
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        ResourceKey::Hash(value.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        ResourceKey::Hash(value)
    }
}

impl From<u64> for ResourceKey {
    fn from(value: u64) -> Self {
        ResourceKey::Ino(value)
    }
}

impl From<&Path> for ResourceKey {
    fn from(value: &Path) -> Self {
        ResourceKey::Path(value.to_path_buf())
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKey::Hash(s) | ResourceKey::Uri(s) => write!(f, "{}", s),
            ResourceKey::Ino(ino) => write!(f, "ino:{}", ino),
            ResourceKey::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Composite lookup, probed hash first, then each url, then inode
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub hash: Option<String>,
    pub urls: Vec<String>,
    pub ino: Option<u64>,
}

#[derive(Debug, Default)]
struct IndexInner {
    by_hash: HashMap<String, Resource>,
    by_uri: HashMap<String, String>,
    by_ino: HashMap<u64, String>,
    by_path: HashMap<PathBuf, String>,
}

impl IndexInner {
    fn unlink(&mut self, resource: &Resource) {
        for url in &resource.uri {
            if self.by_uri.get(url) == Some(&resource.hash) {
                self.by_uri.remove(url);
            }
        }
        if let Some(ino) = resource.ino {
            if self.by_ino.get(&ino) == Some(&resource.hash) {
                self.by_ino.remove(&ino);
            }
        }
        for path in [&resource.stored_path, &resource.path] {
            if self.by_path.get(path) == Some(&resource.hash) {
                self.by_path.remove(path);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceIndex {
    inner: RwLock<IndexInner>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a record under every key it carries, replacing any previous
    /// version of the same hash.
    pub fn put(&self, resource: Resource) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(previous) = inner.by_hash.remove(&resource.hash) {
            inner.unlink(&previous);
        }

        for url in &resource.uri {
            inner.by_uri.insert(url.clone(), resource.hash.clone());
        }
        if let Some(ino) = resource.ino {
            inner.by_ino.insert(ino, resource.hash.clone());
        }
        if resource.is_persisted() {
            inner
                .by_path
                .insert(resource.stored_path.clone(), resource.hash.clone());
        }
        if !resource.path.as_os_str().is_empty() {
            inner
                .by_path
                .insert(resource.path.clone(), resource.hash.clone());
        }
        inner.by_hash.insert(resource.hash.clone(), resource);
    }

    /// Remove a record from every key space. Returns the removed record.
    pub fn discard(&self, hash: &str) -> Option<Resource> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = inner.by_hash.remove(hash)?;
        inner.unlink(&removed);
        Some(removed)
    }

    /// Look up a record by any key
    pub fn get(&self, key: &ResourceKey) -> Option<Resource> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let hash = match key {
            ResourceKey::Hash(s) => {
                // Plain strings are probed across the string key spaces
                if inner.by_hash.contains_key(s) {
                    Some(s)
                } else {
                    inner
                        .by_uri
                        .get(s)
                        .or_else(|| inner.by_path.get(Path::new(s)))
                }
            }
            ResourceKey::Uri(url) => inner.by_uri.get(url),
            ResourceKey::Ino(ino) => inner.by_ino.get(ino),
            ResourceKey::Path(path) => inner.by_path.get(path),
        }?;
        inner.by_hash.get(hash).cloned()
    }

    pub fn query(&self, query: &Query) -> Option<Resource> {
        if let Some(hash) = &query.hash {
            if let Some(found) = self.get(&ResourceKey::Hash(hash.clone())) {
                return Some(found);
            }
        }
        for url in &query.urls {
            if let Some(found) = self.get(&ResourceKey::Uri(url.clone())) {
                return Some(found);
            }
        }
        query.ino.and_then(|ino| self.get(&ResourceKey::Ino(ino)))
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some()
    }

    /// Snapshot of every record, optionally limited to one domain
    pub fn list(&self, domain: Option<ResourceDomain>) -> Vec<Resource> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<Resource> = inner
            .by_hash
            .values()
            .filter(|r| domain.map_or(true, |d| r.domain == d))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.imported_at.cmp(&a.imported_at));
        items
    }

    /// First record matching a predicate
    pub fn find<F>(&self, predicate: F) -> Option<Resource>
    where
        F: Fn(&Resource) -> bool,
    {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_hash.values().find(|r| predicate(r)).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_hash
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceType;

    fn record(hash: &str, stored: &str) -> Resource {
        let mut r = Resource::new(hash, ResourceType::Mod, stored);
        r.stored_path = PathBuf::from(stored);
        r.ino = Some(42);
        r.with_uri("https://cdn.example/a.jar")
            .with_uri("curseforge:1:2")
    }

    #[test]
    fn test_put_indexes_every_key() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));

        assert!(index.contains(&ResourceKey::Hash("abc".into())));
        assert!(index.contains(&ResourceKey::Uri("https://cdn.example/a.jar".into())));
        assert!(index.contains(&ResourceKey::Ino(42)));
        assert!(index.contains(&ResourceKey::Path("/lib/mods/a.jar".into())));
        // plain strings probe uri and path too
        assert!(index.contains(&"curseforge:1:2".into()));
        assert!(index.contains(&"/lib/mods/a.jar".into()));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_discard_removes_every_key() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));

        let removed = index.discard("abc").unwrap();
        assert_eq!(removed.hash, "abc");

        assert!(index.get(&ResourceKey::Hash("abc".into())).is_none());
        assert!(index.get(&ResourceKey::Uri("https://cdn.example/a.jar".into())).is_none());
        assert!(index.get(&ResourceKey::Ino(42)).is_none());
        assert!(index.get(&ResourceKey::Path("/lib/mods/a.jar".into())).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_put_replaces_stale_keys() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));

        let mut updated = record("abc", "/lib/mods/a.jar");
        updated.uri = vec!["https://mirror.example/a.jar".into()];
        index.put(updated);

        assert!(index.get(&ResourceKey::Uri("https://cdn.example/a.jar".into())).is_none());
        assert!(index.get(&ResourceKey::Uri("https://mirror.example/a.jar".into())).is_some());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_discard_keeps_keys_owned_by_other_records() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));
        // a second record claiming the same url takes ownership of it
        index.put(record("def", "/lib/mods/b.jar"));

        index.discard("abc");
        let owner = index.get(&ResourceKey::Uri("https://cdn.example/a.jar".into())).unwrap();
        assert_eq!(owner.hash, "def");
    }

    #[test]
    fn test_query_probe_order() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));

        let by_url = index.query(&Query {
            hash: Some("missing".into()),
            urls: vec!["nope".into(), "curseforge:1:2".into()],
            ino: None,
        });
        assert_eq!(by_url.unwrap().hash, "abc");

        let by_ino = index.query(&Query {
            ino: Some(42),
            ..Default::default()
        });
        assert_eq!(by_ino.unwrap().hash, "abc");

        assert!(index.query(&Query::default()).is_none());
    }

    #[test]
    fn test_list_filters_by_domain() {
        let index = ResourceIndex::new();
        index.put(record("abc", "/lib/mods/a.jar"));
        let mut save = Resource::new("def", ResourceType::Save, "/lib/saves/w.zip");
        save.stored_path = PathBuf::from("/lib/saves/w.zip");
        index.put(save);

        assert_eq!(index.list(None).len(), 2);
        assert_eq!(index.list(Some(ResourceDomain::Saves)).len(), 1);
        assert!(index.list(Some(ResourceDomain::ShaderPacks)).is_empty());
    }
}
