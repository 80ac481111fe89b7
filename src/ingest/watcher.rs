//! Per-domain directory watcher.
//!
//! Each domain directory gets one watcher with the lifecycle
//! `Uninitialized -> Scanning -> Watching -> Disposed`. While watching, raw
//! filesystem notifications are reduced to "added" / "removed" changes on
//! primary files. Additions settle for a short window so a file still being
//! written is imported once, after the writes stop. Sidecars and staging
//! files are never treated as resources.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{ResourceDomain, ResourceError, Result};
use crate::library::PENDING_SUFFIX;

use super::pending::PendingMarkers;

/// How long an added path must stay quiet before it is processed
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(300);

const SIDECAR_EXTENSIONS: &[&str] = &["json", "png"];

/// Receives the reconciled changes of one domain directory
#[async_trait]
pub trait DomainEventHandler: Send + Sync + 'static {
    /// A primary file appeared that the importer did not write itself
    async fn file_added(&self, domain: ResourceDomain, path: PathBuf) -> Result<()>;

    /// A primary file disappeared
    async fn file_removed(&self, domain: ResourceDomain, path: PathBuf) -> Result<()>;

    /// A callback failed. The watcher keeps running.
    fn fault(&self, domain: ResourceDomain, error: ResourceError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Uninitialized,
    Scanning,
    Watching,
    Disposed,
}

/// What a path in a domain directory is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRole {
    Primary,
    /// `<name>.json` metadata or `<name>.png` icon
    Sidecar,
    /// `<name>.pending` staging copy
    Pending,
    /// Matched a configured ignore pattern
    Ignored,
}

/// Classify a path by its file name
pub fn classify_path(path: &Path, ignore: &[glob::Pattern]) -> PathRole {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if name.ends_with(PENDING_SUFFIX) {
        return PathRole::Pending;
    }
    if ignore.iter().any(|p| p.matches(&name)) {
        return PathRole::Ignored;
    }
    let is_sidecar = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SIDECAR_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false);
    if is_sidecar {
        PathRole::Sidecar
    } else {
        PathRole::Primary
    }
}

/// A change to a domain directory, after reduction of raw notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainChange {
    Added(PathBuf),
    Removed(PathBuf),
}

/// Reduce one notify event to domain changes
pub fn changes_from_event(event: Event) -> Vec<DomainChange> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(DomainChange::Added).collect(),
        EventKind::Remove(_) => paths.into_iter().map(DomainChange::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let mut paths = paths.into_iter();
            let from = paths.next().map(DomainChange::Removed);
            let to = paths.next().map(DomainChange::Added);
            from.into_iter().chain(to).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(DomainChange::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(DomainChange::Added).collect()
        }
        // Platforms that cannot tell the direction of a rename
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|p| {
                if p.exists() {
                    DomainChange::Added(p)
                } else {
                    DomainChange::Removed(p)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            paths.into_iter().map(DomainChange::Added).collect()
        }
        _ => Vec::new(),
    }
}

/// Result of the initial directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Primary entries (files and directories)
    pub primaries: Vec<PathBuf>,
    /// `<name>.json` sidecars left by the legacy storage format
    pub legacy_metadata: Vec<PathBuf>,
    /// Stale `<name>.pending` copies from an interrupted import
    pub stale_pending: Vec<PathBuf>,
}

impl ScanResult {
    pub fn total_scanned(&self) -> usize {
        self.primaries.len() + self.legacy_metadata.len() + self.stale_pending.len()
    }
}

/// Watcher for one domain directory
pub struct DomainWatcher {
    domain: ResourceDomain,
    dir: PathBuf,
    markers: Arc<PendingMarkers>,
    ignore: Vec<glob::Pattern>,
    settle: Duration,
    state: Mutex<WatcherState>,
}

impl DomainWatcher {
    pub fn new(
        domain: ResourceDomain,
        dir: PathBuf,
        markers: Arc<PendingMarkers>,
        ignore: Vec<glob::Pattern>,
    ) -> Self {
        Self {
            domain,
            dir,
            markers,
            ignore,
            settle: DEFAULT_SETTLE,
            state: Mutex::new(WatcherState::Uninitialized),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn domain(&self) -> ResourceDomain {
        self.domain
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, from: WatcherState, to: WatcherState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn dispose(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = WatcherState::Disposed;
    }

    /// One-time scan of the directory (creating it if missing)
    pub async fn scan(&self) -> Result<ScanResult> {
        if !self.transition(WatcherState::Uninitialized, WatcherState::Scanning) {
            return Err(std::io::Error::other(format!(
                "{} watcher already scanned (state {:?})",
                self.domain,
                self.state()
            ))
            .into());
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let mut result = ScanResult::default();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match classify_path(&path, &self.ignore) {
                PathRole::Primary => result.primaries.push(path),
                PathRole::Sidecar => {
                    if path.extension().is_some_and(|e| e == "json") {
                        result.legacy_metadata.push(path);
                    }
                }
                PathRole::Pending => result.stale_pending.push(path),
                PathRole::Ignored => {}
            }
        }

        result.primaries.sort();
        debug!(
            "Scanned {}: {} primary, {} legacy metadata",
            self.dir.display(),
            result.primaries.len(),
            result.legacy_metadata.len()
        );
        Ok(result)
    }

    /// Subscribe to change notifications and start the event loop
    pub fn watch(self: Arc<Self>, handler: Arc<dyn DomainEventHandler>) -> Result<WatchHandle> {
        if !self.transition(WatcherState::Scanning, WatcherState::Watching) {
            return Err(std::io::Error::other(format!(
                "{} watcher cannot start watching from state {:?}",
                self.domain,
                self.state()
            ))
            .into());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscription = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone only after the loop has stopped
            let _ = event_tx.send(res);
        });
        let mut subscription: RecommendedWatcher = match subscription {
            Ok(w) => w,
            Err(e) => {
                self.dispose();
                return Err(e.into());
            }
        };
        if let Err(e) = subscription.watch(&self.dir, RecursiveMode::NonRecursive) {
            self.dispose();
            return Err(e.into());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let watcher = Arc::clone(&self);
        let task = tokio::spawn(async move {
            run_watcher(Arc::clone(&watcher), handler, subscription, event_rx, stop_rx).await;
            watcher.dispose();
        });

        info!("Watching {} for {}", self.dir.display(), self.domain);

        Ok(WatchHandle {
            stop_tx,
            task: Some(task),
            watcher: self,
        })
    }
}

/// Handle to a running watcher. Dropping it disposes the watcher.
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: Option<tokio::task::JoinHandle<()>>,
    watcher: Arc<DomainWatcher>,
}

impl WatchHandle {
    pub fn state(&self) -> WatcherState {
        self.watcher.state()
    }

    pub fn domain(&self) -> ResourceDomain {
        self.watcher.domain
    }

    /// Stop the watcher and wait for its loop to exit
    pub async fn stop(mut self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        if let Some(task) = self.task.take() {
            task.await?;
        }
        self.watcher.dispose();
        Ok(())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.watcher.dispose();
    }
}

/// Internal watcher loop. Owns the notify subscription, which is closed
/// when the loop returns or its task is aborted.
async fn run_watcher(
    watcher: Arc<DomainWatcher>,
    handler: Arc<dyn DomainEventHandler>,
    _subscription: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let domain = watcher.domain;
    // Added paths waiting for writes to stop (path -> last event)
    let mut settling: HashMap<PathBuf, Instant> = HashMap::new();
    let mut in_flight: HashSet<PathBuf> = HashSet::new();
    let mut imports: JoinSet<PathBuf> = JoinSet::new();

    loop {
        let next_deadline = settling.values().min().map(|t| *t + watcher.settle);
        let settle_tick = async {
            match next_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = stop_rx.recv() => {
                info!("{} watcher stopping...", domain);
                break;
            }

            Some(done) = imports.join_next(), if !imports.is_empty() => {
                match done {
                    Ok(path) => {
                        in_flight.remove(&path);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => handler.fault(domain, e.into()),
                }
            }

            received = events.recv() => {
                let Some(received) = received else {
                    warn!("{} watcher channel disconnected", domain);
                    break;
                };
                let event = match received {
                    Ok(event) => event,
                    Err(e) => {
                        handler.fault(domain, e.into());
                        continue;
                    }
                };
                for change in changes_from_event(event) {
                    match change {
                        DomainChange::Added(path) => {
                            if classify_path(&path, &watcher.ignore) == PathRole::Primary {
                                settling.insert(path, Instant::now());
                            }
                        }
                        DomainChange::Removed(path) => {
                            settling.remove(&path);
                            if classify_path(&path, &watcher.ignore) != PathRole::Primary {
                                continue;
                            }
                            if let Err(e) = handler.file_removed(domain, path).await {
                                handler.fault(domain, e);
                            }
                        }
                    }
                }
            }

            _ = settle_tick => {
                let now = Instant::now();
                let ready: Vec<PathBuf> = settling
                    .iter()
                    .filter(|(_, seen)| now.duration_since(**seen) >= watcher.settle)
                    .map(|(path, _)| path.clone())
                    .collect();

                for path in ready {
                    settling.remove(&path);

                    if watcher.markers.consume(&path) {
                        debug!("Ignore re-import of a file being imported: {}", path.display());
                        continue;
                    }
                    if !in_flight.insert(path.clone()) {
                        debug!("Import already running for {}", path.display());
                        continue;
                    }

                    let handler = Arc::clone(&handler);
                    imports.spawn(async move {
                        if let Err(e) = handler.file_added(domain, path.clone()).await {
                            handler.fault(domain, e);
                        }
                        path
                    });
                }
            }
        }
    }

    imports.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    #[test]
    fn test_classify_path() {
        let ignore = vec![glob::Pattern::new("*.disabled").unwrap()];
        assert_eq!(classify_path(Path::new("/m/a.jar"), &ignore), PathRole::Primary);
        assert_eq!(classify_path(Path::new("/m/a.json"), &ignore), PathRole::Sidecar);
        assert_eq!(classify_path(Path::new("/m/a.PNG"), &ignore), PathRole::Sidecar);
        assert_eq!(classify_path(Path::new("/m/a.jar.pending"), &ignore), PathRole::Pending);
        assert_eq!(classify_path(Path::new("/m/a.jar.disabled"), &ignore), PathRole::Ignored);
        assert_eq!(classify_path(Path::new("/saves/World 1"), &ignore), PathRole::Primary);
    }

    #[test]
    fn test_rename_both_splits_into_remove_and_add() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/m/a.jar.pending"))
            .add_path(PathBuf::from("/m/a.jar"));

        assert_eq!(
            changes_from_event(event),
            vec![
                DomainChange::Removed(PathBuf::from("/m/a.jar.pending")),
                DomainChange::Added(PathBuf::from("/m/a.jar")),
            ]
        );
    }

    #[test]
    fn test_create_modify_remove_mapping() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/m/a.jar".into());
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/m/a.jar".into());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/m/a.jar".into());
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/m/a.jar".into());

        assert_eq!(changes_from_event(create), vec![DomainChange::Added("/m/a.jar".into())]);
        assert_eq!(changes_from_event(write), vec![DomainChange::Added("/m/a.jar".into())]);
        assert_eq!(changes_from_event(remove), vec![DomainChange::Removed("/m/a.jar".into())]);
        assert!(changes_from_event(access).is_empty());
    }

    #[tokio::test]
    async fn test_scan_classifies_entries() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("mods");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("a.jar"), b"a").await.unwrap();
        tokio::fs::write(dir.join("a.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.join("a.png"), b"png").await.unwrap();
        tokio::fs::write(dir.join("b.jar.pending"), b"partial").await.unwrap();

        let watcher = DomainWatcher::new(
            ResourceDomain::Mods,
            dir.clone(),
            Arc::new(PendingMarkers::new()),
            Vec::new(),
        );
        assert_eq!(watcher.state(), WatcherState::Uninitialized);

        let scan = watcher.scan().await.unwrap();
        assert_eq!(watcher.state(), WatcherState::Scanning);
        assert_eq!(scan.primaries, vec![dir.join("a.jar")]);
        assert_eq!(scan.legacy_metadata, vec![dir.join("a.json")]);
        assert_eq!(scan.stale_pending, vec![dir.join("b.jar.pending")]);
        assert_eq!(scan.total_scanned(), 3);

        // a second scan is a lifecycle error
        assert!(watcher.scan().await.is_err());
    }

    #[tokio::test]
    async fn test_scan_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("shaderpacks");
        let watcher = DomainWatcher::new(
            ResourceDomain::ShaderPacks,
            dir.clone(),
            Arc::new(PendingMarkers::new()),
            Vec::new(),
        );

        let scan = watcher.scan().await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(scan.total_scanned(), 0);
    }

    #[tokio::test]
    async fn test_watch_requires_scan() {
        let temp = TempDir::new().unwrap();
        let watcher = Arc::new(DomainWatcher::new(
            ResourceDomain::Mods,
            temp.path().to_path_buf(),
            Arc::new(PendingMarkers::new()),
            Vec::new(),
        ));

        struct Noop;
        #[async_trait]
        impl DomainEventHandler for Noop {
            async fn file_added(&self, _: ResourceDomain, _: PathBuf) -> Result<()> {
                Ok(())
            }
            async fn file_removed(&self, _: ResourceDomain, _: PathBuf) -> Result<()> {
                Ok(())
            }
            fn fault(&self, _: ResourceDomain, _: ResourceError) {}
        }

        assert!(Arc::clone(&watcher).watch(Arc::new(Noop)).is_err());
        assert_eq!(watcher.state(), WatcherState::Uninitialized);
    }
}
