//! Paths the importer is about to write into a watched directory.
//!
//! A marker is set before a file is materialized and consumed by the first
//! watcher event for that path, which is then ignored. Markers only save
//! work: a missed marker falls through to identity resolution, which finds
//! the record by inode or hash.
//!
//! Markers expire after a time-to-live so one that never meets its event
//! cannot swallow a later, unrelated file at the same path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a marker waits for its watcher event by default
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct PendingMarkers {
    paths: Mutex<HashMap<PathBuf, Instant>>,
    ttl: Duration,
}

impl Default for PendingMarkers {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_MARKER_TTL)
    }
}

impl PendingMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark a path as being written by the importer. Marking again
    /// restarts its time-to-live.
    pub fn mark(&self, path: &Path) {
        let now = Instant::now();
        let mut paths = self.lock();
        paths.retain(|_, marked| now.duration_since(*marked) < self.ttl);
        paths.insert(path.to_path_buf(), now);
    }

    /// Consume the marker for a path. Returns true if it was marked and
    /// had not expired.
    pub fn consume(&self, path: &Path) -> bool {
        self.lock()
            .remove(path)
            .is_some_and(|marked| marked.elapsed() < self.ttl)
    }

    /// Drop a marker without an event (materialization failed, wrote
    /// nothing, or no watcher will ever report it)
    pub fn unmark(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn is_marked(&self, path: &Path) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|marked| marked.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Instant>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_consumed_once() {
        let markers = PendingMarkers::new();
        let path = Path::new("/lib/mods/a.jar");

        markers.mark(path);
        assert!(markers.is_marked(path));
        assert!(markers.consume(path));
        assert!(!markers.consume(path));
        assert!(markers.is_empty());
    }

    #[test]
    fn test_unmark() {
        let markers = PendingMarkers::new();
        markers.mark(Path::new("/lib/mods/a.jar"));
        markers.unmark(Path::new("/lib/mods/a.jar"));
        assert!(!markers.consume(Path::new("/lib/mods/a.jar")));
    }

    #[test]
    fn test_expired_marker_is_not_consumed() {
        let markers = PendingMarkers::with_ttl(Duration::from_millis(20));
        let path = Path::new("/lib/mods/a.jar");

        markers.mark(path);
        std::thread::sleep(Duration::from_millis(40));
        assert!(!markers.is_marked(path));
        assert!(!markers.consume(path));
        assert!(markers.is_empty());
    }

    #[test]
    fn test_mark_prunes_expired_markers() {
        let markers = PendingMarkers::with_ttl(Duration::from_millis(20));
        markers.mark(Path::new("/lib/mods/a.jar"));
        markers.mark(Path::new("/lib/mods/b.jar"));
        std::thread::sleep(Duration::from_millis(40));

        markers.mark(Path::new("/lib/mods/c.jar"));
        assert_eq!(markers.len(), 1);
        assert!(markers.is_marked(Path::new("/lib/mods/c.jar")));
    }
}
