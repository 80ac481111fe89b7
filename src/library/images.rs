//! Flat, content-addressed image store.
//!
//! Images are written once under their hash and referenced as
//! `image://<hash>`. Writes go through a temp file in the same directory and
//! are persisted without clobbering, so concurrent writers of the same bytes
//! leave exactly one file behind.

use std::path::{Path, PathBuf};

use crate::domain::Result;

use super::hasher;

pub const IMAGE_SCHEME: &str = "image://";

/// Image payload accepted by [`ImageStore::add`]
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl From<Vec<u8>> for ImageSource {
    fn from(value: Vec<u8>) -> Self {
        ImageSource::Bytes(value)
    }
}

impl From<&Path> for ImageSource {
    fn from(value: &Path) -> Self {
        ImageSource::Path(value.to_path_buf())
    }
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Path backing an `image://` reference, if it is one
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        reference
            .strip_prefix(IMAGE_SCHEME)
            .filter(|hash| !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|hash| self.dir.join(hash))
    }

    /// Store an image if absent and return its reference
    pub async fn add(&self, source: ImageSource) -> Result<String> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::Path(path) => tokio::fs::read(&path).await?,
        };
        let hash = hasher::hash_bytes(&bytes);
        let target = self.dir.join(&hash);

        if !tokio::fs::try_exists(&target).await? {
            self.ensure_dir().await?;
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || write_once(&dir, &target, &bytes)).await??;
        }

        Ok(format!("{}{}", IMAGE_SCHEME, hash))
    }
}

fn write_once(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    match temp.persist_noclobber(target) {
        Ok(_) => Ok(()),
        // Another writer got there first with the same content
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = ImageStore::new(temp.path().join("resource-images"));

        let first = store.add(b"fake png".to_vec().into()).await.unwrap();
        let path = store.resolve(&first).unwrap();
        let written_at = std::fs::metadata(&path).unwrap().modified().unwrap();

        let second = store.add(b"fake png".to_vec().into()).await.unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("image://"));
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), written_at);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_add_from_path_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let store = ImageStore::new(temp.path().join("resource-images"));
        let icon = temp.path().join("icon.png");
        tokio::fs::write(&icon, b"icon bytes").await.unwrap();

        let from_path = store.add(ImageSource::from(icon.as_path())).await.unwrap();
        let from_bytes = store.add(b"icon bytes".to_vec().into()).await.unwrap();

        assert_eq!(from_path, from_bytes);
        assert_eq!(
            std::fs::read(store.resolve(&from_path).unwrap()).unwrap(),
            b"icon bytes"
        );
    }

    #[test]
    fn test_resolve_rejects_foreign_references() {
        let store = ImageStore::new(PathBuf::from("/lib/resource-images"));
        assert!(store.resolve("https://example.com/icon.png").is_none());
        assert!(store.resolve("image://../../etc/passwd").is_none());
        assert_eq!(
            store.resolve("image://abc123"),
            Some(PathBuf::from("/lib/resource-images/abc123"))
        );
    }
}
