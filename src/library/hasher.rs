//! Content identity and coarse classification of files.
//!
//! Hashing streams the file on the blocking pool so large archives never
//! stall the runtime.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Result;

/// Content id reported for directories. Contains characters that never
/// appear in a hex digest.
pub const DIRECTORY_SENTINEL: &str = "<directory>";

const READ_BUFFER: usize = 64 * 1024;

/// Leading bytes of container formats we recognise as importable files
const KNOWN_SIGNATURES: &[&[u8]] = &[
    b"PK\x03\x04",         // zip, jar, mrpack
    b"PK\x05\x06",         // empty zip
    b"\x1f\x8b",           // gzip (level.dat, tar.gz)
    b"\x89PNG\r\n\x1a\n",  // png
    b"7z\xbc\xaf\x27\x1c", // 7z
    b"Rar!\x1a\x07",       // rar
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// A regular file in a recognised container format
    File,
    Directory,
    /// A regular file whose format we do not recognise
    Unknown,
}

/// Result of [`identify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub content_id: String,
    pub file_type: FileType,
}

impl Identity {
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// The subset of file metadata the importer cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub ino: Option<u64>,
    pub size: u64,
    pub is_directory: bool,
    pub modified: Option<SystemTime>,
}

/// Read file metadata (following symlinks)
pub async fn stat(path: &Path) -> Result<FileStat> {
    let metadata = tokio::fs::metadata(path).await?;

    #[cfg(unix)]
    let ino = {
        use std::os::unix::fs::MetadataExt;
        Some(metadata.ino())
    };
    #[cfg(not(unix))]
    let ino = None;

    Ok(FileStat {
        ino,
        size: metadata.len(),
        is_directory: metadata.is_dir(),
        modified: metadata.modified().ok(),
    })
}

/// Compute the content identity and classification of a path
pub async fn identify(path: &Path) -> Result<Identity> {
    let path: PathBuf = path.to_path_buf();
    let identity = tokio::task::spawn_blocking(move || identify_blocking(&path)).await??;
    Ok(identity)
}

fn identify_blocking(path: &Path) -> std::io::Result<Identity> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_dir() {
        return Ok(Identity {
            content_id: DIRECTORY_SENTINEL.to_string(),
            file_type: FileType::Directory,
        });
    }

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut head: Vec<u8> = Vec::with_capacity(8);

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        if head.len() < 8 {
            let take = (8 - head.len()).min(read);
            head.extend_from_slice(&buffer[..take]);
        }
        hasher.update(&buffer[..read]);
    }

    Ok(Identity {
        content_id: hex::encode(hasher.finalize()),
        file_type: classify(&head),
    })
}

fn classify(head: &[u8]) -> FileType {
    if KNOWN_SIGNATURES.iter().any(|sig| head.starts_with(sig)) {
        FileType::File
    } else {
        FileType::Unknown
    }
}

/// Hex SHA-256 of an in-memory buffer
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
