//! Moving imported files into canonical domain storage.
//!
//! The destination path is marked pending before anything touches the
//! watched directory. Copies are staged as `<name>.pending` and renamed
//! into place so a watcher never sees a half-written primary file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Result;
use crate::ingest::PendingMarkers;

use super::hasher;

/// Suffix of in-progress copies; ignored by domain watchers
pub const PENDING_SUFFIX: &str = ".pending";

/// How a source file becomes owned by the library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeStrategy {
    /// Hard link when source and library share a filesystem, copy otherwise
    #[default]
    LinkOrCopy,
    Copy,
    /// Rename the source into the library (falls back to copy + delete)
    Move,
}

impl std::str::FromStr for MaterializeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "link_or_copy" | "link" => Ok(Self::LinkOrCopy),
            "copy" => Ok(Self::Copy),
            "move" | "rename" => Ok(Self::Move),
            _ => anyhow::bail!("Unknown materialize strategy: {}", s),
        }
    }
}

/// Place `source` into `domain_dir` and return the stored path.
///
/// A source already inside `domain_dir` is left where it is. An existing
/// destination with identical content is reused.
pub async fn materialize(
    source: &Path,
    domain_dir: &Path,
    file_name: &str,
    hash: &str,
    strategy: MaterializeStrategy,
    markers: &PendingMarkers,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(domain_dir).await?;

    if is_inside(source, domain_dir).await {
        return Ok(match source.file_name() {
            Some(name) => domain_dir.join(name),
            None => source.to_path_buf(),
        });
    }

    let mut target = domain_dir.join(file_name);
    if let Some(stored) = reuse_or_rename(&mut target, hash).await? {
        return Ok(stored);
    }

    markers.mark(&target);
    if let Err(e) = transfer(source, &target, strategy).await {
        markers.unmark(&target);
        return Err(e.into());
    }
    // a long transfer must not outlive its own marker
    markers.mark(&target);

    debug!("Materialized {} -> {}", source.display(), target.display());
    Ok(target)
}

/// Returns `Some(target)` when identical content already sits at the
/// destination. Otherwise adjusts `target` to a free name.
async fn reuse_or_rename(target: &mut PathBuf, hash: &str) -> Result<Option<PathBuf>> {
    for attempt in 0..2 {
        if !tokio::fs::try_exists(&*target).await? {
            return Ok(None);
        }
        if hasher::identify(target).await?.content_id == hash {
            return Ok(Some(target.clone()));
        }
        if attempt == 0 {
            *target = disambiguate(target, hash);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("{} exists with different content", target.display()),
    )
    .into())
}

/// `mymod.jar` + hash `abcdef12…` -> `mymod-abcdef12.jar`
fn disambiguate(target: &Path, hash: &str) -> PathBuf {
    let short = &hash[..hash.len().min(8)];
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}-{}.{}", stem, short, ext.to_string_lossy()),
        None => format!("{}-{}", stem, short),
    };
    target.with_file_name(name)
}

async fn transfer(
    source: &Path,
    target: &Path,
    strategy: MaterializeStrategy,
) -> std::io::Result<()> {
    match strategy {
        MaterializeStrategy::LinkOrCopy => {
            if tokio::fs::hard_link(source, target).await.is_ok() {
                return Ok(());
            }
            copy_staged(source, target).await
        }
        MaterializeStrategy::Copy => copy_staged(source, target).await,
        MaterializeStrategy::Move => {
            if tokio::fs::rename(source, target).await.is_ok() {
                return Ok(());
            }
            copy_staged(source, target).await?;
            tokio::fs::remove_file(source).await
        }
    }
}

async fn copy_staged(source: &Path, target: &Path) -> std::io::Result<()> {
    let staging = pending_path(target);
    if let Err(e) = tokio::fs::copy(source, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }
    tokio::fs::rename(&staging, target).await
}

/// `<path>.pending`
pub fn pending_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PENDING_SUFFIX);
    PathBuf::from(name)
}

async fn is_inside(path: &Path, dir: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    match (
        tokio::fs::canonicalize(parent).await,
        tokio::fs::canonicalize(dir).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => parent == dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup(content: &[u8]) -> (TempDir, PathBuf, PathBuf, String) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("downloads").join("mymod.jar");
        tokio::fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, content).await.unwrap();
        let hash = hasher::identify(&source).await.unwrap().content_id;
        let mods = temp.path().join("mods");
        (temp, source, mods, hash)
    }

    #[tokio::test]
    async fn test_copy_marks_target_and_keeps_source() {
        let (_temp, source, mods, hash) = setup(b"PK\x03\x04mod").await;
        let markers = PendingMarkers::new();

        let stored = materialize(&source, &mods, "mymod.jar", &hash, MaterializeStrategy::Copy, &markers)
            .await
            .unwrap();

        assert_eq!(stored, mods.join("mymod.jar"));
        assert!(source.exists());
        assert!(markers.is_marked(&stored));
        assert!(!pending_path(&stored).exists());
        assert_eq!(std::fs::read(&stored).unwrap(), b"PK\x03\x04mod");
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let (_temp, source, mods, hash) = setup(b"PK\x03\x04mod").await;
        let markers = PendingMarkers::new();

        let stored = materialize(&source, &mods, "mymod.jar", &hash, MaterializeStrategy::Move, &markers)
            .await
            .unwrap();

        assert!(!source.exists());
        assert!(stored.exists());
    }

    #[tokio::test]
    async fn test_source_inside_domain_is_not_moved() {
        let (_temp, _source, mods, _) = setup(b"x").await;
        tokio::fs::create_dir_all(&mods).await.unwrap();
        let inside = mods.join("already.jar");
        tokio::fs::write(&inside, b"PK\x03\x04inside").await.unwrap();
        let markers = PendingMarkers::new();

        let stored = materialize(&inside, &mods, "already.jar", "h", MaterializeStrategy::Copy, &markers)
            .await
            .unwrap();

        assert_eq!(stored, inside);
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_identical_destination_is_reused() {
        let (_temp, source, mods, hash) = setup(b"PK\x03\x04mod").await;
        tokio::fs::create_dir_all(&mods).await.unwrap();
        tokio::fs::write(mods.join("mymod.jar"), b"PK\x03\x04mod").await.unwrap();
        let markers = PendingMarkers::new();

        let stored = materialize(&source, &mods, "mymod.jar", &hash, MaterializeStrategy::Copy, &markers)
            .await
            .unwrap();

        assert_eq!(stored, mods.join("mymod.jar"));
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_name_collision_gets_hash_suffix() {
        let (_temp, source, mods, hash) = setup(b"PK\x03\x04new").await;
        tokio::fs::create_dir_all(&mods).await.unwrap();
        tokio::fs::write(mods.join("mymod.jar"), b"PK\x03\x04old").await.unwrap();
        let markers = PendingMarkers::new();

        let stored = materialize(&source, &mods, "mymod.jar", &hash, MaterializeStrategy::Copy, &markers)
            .await
            .unwrap();

        assert_eq!(stored, mods.join(format!("mymod-{}.jar", &hash[..8])));
        assert_eq!(std::fs::read(mods.join("mymod.jar")).unwrap(), b"PK\x03\x04old");
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("link".parse::<MaterializeStrategy>().unwrap(), MaterializeStrategy::LinkOrCopy);
        assert_eq!("link-or-copy".parse::<MaterializeStrategy>().unwrap(), MaterializeStrategy::LinkOrCopy);
        assert_eq!("move".parse::<MaterializeStrategy>().unwrap(), MaterializeStrategy::Move);
        assert!("teleport".parse::<MaterializeStrategy>().is_err());
    }

    #[test]
    fn test_pending_path() {
        assert_eq!(
            pending_path(Path::new("/lib/mods/a.jar")),
            PathBuf::from("/lib/mods/a.jar.pending")
        );
    }
}
