//! The resource service: owner of the index, the store and the domain watchers.
//!
//! Every path into the library (explicit imports, batch imports, files that
//! show up in a watched directory, legacy migration) converges on the same
//! sequence: resolve by identity, parse, materialize, persist, index. A
//! single commit gate serializes the persist and index steps so two imports
//! of the same content always end in one record.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::ResolvedConfig;
use crate::domain::{
    Resource, ResourceDomain, ResourceError, ResourceEvent, ResourceSources, Result,
};
use crate::ingest::{DomainEventHandler, DomainWatcher, PendingMarkers, WatchHandle};
use crate::library::{
    hasher, materialize, ExtensionParser, FileType, ImageSource, ImageStore, ParsedResource,
    Query, ResourceIndex, ResourceKey, ResourceParser, ResourceStore, SqliteStore,
};

use super::migrate;
use super::request::{ImportContext, ImportFailure, ImportManyResult, ImportRequest, UpdateRequest};
use super::scheduler::ImportScheduler;
use super::signal::{Outcome, ReadySignal, SingleFlight};

/// How an import ended
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// The content was already known; the record was merge-updated
    Existing(Resource),
    Imported(Resource),
    /// Optional import of an unrecognised file or a directory
    Skipped,
}

impl ImportOutcome {
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            ImportOutcome::Existing(r) | ImportOutcome::Imported(r) => Some(r),
            ImportOutcome::Skipped => None,
        }
    }
}

pub struct ResourceService {
    config: ResolvedConfig,
    domain_dirs: HashMap<ResourceDomain, PathBuf>,
    index: ResourceIndex,
    store: Arc<dyn ResourceStore>,
    parser: Arc<dyn ResourceParser>,
    images: ImageStore,
    markers: Arc<PendingMarkers>,
    /// Provenance registered ahead of an import, by content hash
    pending_sources: Mutex<HashMap<String, ResourceSources>>,
    scheduler: ImportScheduler,
    loads: SingleFlight<ResourceDomain, Outcome>,
    ready: HashMap<ResourceDomain, ReadySignal>,
    watchers: Mutex<HashMap<ResourceDomain, WatchHandle>>,
    /// Loads spawned by `start`, awaited on shutdown
    loaders: Mutex<JoinSet<()>>,
    commit_gate: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<ResourceEvent>,
    this: Weak<ResourceService>,
    closed: AtomicBool,
    /// Advisory lock on `<home>/.lock`, released on shutdown
    lock: Mutex<Option<std::fs::File>>,
}

impl std::fmt::Debug for ResourceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceService")
            .field("home", &self.config.home)
            .field("resources", &self.index.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ResourceService {
    /// Open the library described by `config` with the built-in store and parser
    pub async fn open(
        config: ResolvedConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ResourceEvent>)> {
        tokio::fs::create_dir_all(&config.home).await?;
        let store = SqliteStore::open(&config.database_path())?;
        Self::open_with(config, Arc::new(store), Arc::new(ExtensionParser)).await
    }

    /// Open the library with caller-provided collaborators
    pub async fn open_with(
        config: ResolvedConfig,
        store: Arc<dyn ResourceStore>,
        parser: Arc<dyn ResourceParser>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ResourceEvent>)> {
        tokio::fs::create_dir_all(&config.home).await?;
        let lock = acquire_lock(&config.lock_path())?;

        let mut domain_dirs = HashMap::new();
        for domain in ResourceDomain::ALL {
            let dir = config.domain_dir(domain);
            tokio::fs::create_dir_all(&dir).await?;
            domain_dirs.insert(domain, tokio::fs::canonicalize(&dir).await?);
        }

        let ready: HashMap<ResourceDomain, ReadySignal> = ResourceDomain::ALL
            .iter()
            .map(|domain| (*domain, ReadySignal::new()))
            .collect();
        let (events, receiver) = mpsc::unbounded_channel();

        let service = Arc::new_cyclic(|this| Self {
            images: ImageStore::new(config.images_dir()),
            scheduler: ImportScheduler::new(config.max_concurrent_imports),
            config,
            domain_dirs,
            index: ResourceIndex::new(),
            store,
            parser,
            markers: Arc::new(PendingMarkers::new()),
            pending_sources: Mutex::new(HashMap::new()),
            loads: SingleFlight::new(),
            ready,
            watchers: Mutex::new(HashMap::new()),
            loaders: Mutex::new(JoinSet::new()),
            commit_gate: tokio::sync::Mutex::new(()),
            events,
            this: this.clone(),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(lock)),
        });

        Ok((service, receiver))
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Canonical directory of a domain
    pub fn domain_dir(&self, domain: ResourceDomain) -> PathBuf {
        self.domain_dirs
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| self.config.domain_dir(domain))
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Rebuild the index from the store. Returns the number of records.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.store.values().await?;
        let count = records.len();
        for record in records {
            self.index.put(record);
        }
        self.images.ensure_dir().await?;
        info!("Loaded {} resources from {}", count, self.config.home.display());
        Ok(count)
    }

    /// Restore the index, then load every domain in the background
    pub async fn start(&self) -> Result<()> {
        self.restore().await?;

        let Some(service) = self.this.upgrade() else {
            return Ok(());
        };
        let mut loaders = self.loaders.lock().unwrap_or_else(|e| e.into_inner());
        for domain in ResourceDomain::ALL {
            let service = Arc::clone(&service);
            loaders.spawn(async move {
                if let Err(e) = service.load(domain).await {
                    warn!("{}", e);
                }
            });
        }
        Ok(())
    }

    /// Scan and migrate a domain directory, then start watching it.
    ///
    /// Concurrent calls share one run. Once a domain is loaded, later calls
    /// return the recorded outcome.
    pub async fn load(&self, domain: ResourceDomain) -> Result<()> {
        let signal = self.ready_signal(domain)?;
        if signal.is_resolved() {
            return signal
                .wait()
                .await
                .map_err(|message| ResourceError::LoadFailed(domain, message));
        }

        let outcome = self
            .loads
            .run(domain, || async {
                // Lost the race against a run that just finished
                if signal.is_resolved() {
                    return signal.wait().await;
                }
                let outcome = self.load_domain(domain).await.map_err(|e| e.to_string());
                signal.resolve(outcome.clone());
                outcome
            })
            .await;

        outcome.map_err(|message| ResourceError::LoadFailed(domain, message))
    }

    /// Resolves once the initial scan and migration of `domain` finished
    pub async fn when_ready(&self, domain: ResourceDomain) -> Result<()> {
        self.ready_signal(domain)?
            .wait()
            .await
            .map_err(|message| ResourceError::LoadFailed(domain, message))
    }

    /// Stop every watcher and release the library lock
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        // Loads notice `closed` between steps and return early
        let mut loaders = {
            let mut guard = self.loaders.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        while loaders.join_next().await.is_some() {}

        let handles: Vec<WatchHandle> = {
            let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
            watchers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let domain = handle.domain();
            if let Err(e) = handle.stop().await {
                warn!("Failed to stop {} watcher: {}", domain, e);
            }
        }

        let lock = self.lock.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(lock);
        info!("Resource service stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a watcher is currently running for `domain`
    pub fn is_watching(&self, domain: ResourceDomain) -> bool {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&domain)
    }

    fn ready_signal(&self, domain: ResourceDomain) -> Result<ReadySignal> {
        self.ready
            .get(&domain)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(format!("domain {}", domain)))
    }

    async fn load_domain(&self, domain: ResourceDomain) -> Result<()> {
        let dir = self.domain_dir(domain);
        let watcher = Arc::new(
            DomainWatcher::new(
                domain,
                dir,
                Arc::clone(&self.markers),
                self.config.ignore_patterns(),
            )
            .with_settle(self.config.settle),
        );

        let scan = watcher.scan().await?;
        if self.is_closed() {
            return Ok(());
        }
        let report = migrate::migrate_domain(self, domain, &scan).await?;
        info!(
            "Loaded {}: {} scanned, {} migrated, {} imported, {} evicted",
            domain,
            scan.total_scanned(),
            report.migrated,
            report.imported,
            report.evicted
        );

        if self.is_closed() {
            return Ok(());
        }

        let handler = Arc::new(ServiceHandler {
            service: self.this.clone(),
        });
        let handle = watcher.watch(handler)?;
        // shutdown() sets `closed` before draining the map
        let orphan = {
            let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                Some(handle)
            } else {
                watchers.insert(domain, handle);
                None
            }
        };
        if let Some(handle) = orphan {
            handle.stop().await?;
            return Ok(());
        }

        self.emit(ResourceEvent::DomainReady { domain });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn get_by_key(&self, key: impl Into<ResourceKey>) -> Option<Resource> {
        self.index.get(&key.into())
    }

    /// Like [`get_by_key`](Self::get_by_key), failing with `NotFound`
    pub fn require(&self, key: impl Into<ResourceKey>) -> Result<Resource> {
        let key = key.into();
        self.index
            .get(&key)
            .ok_or_else(|| ResourceError::NotFound(key.to_string()))
    }

    pub fn query(&self, query: &Query) -> Option<Resource> {
        self.index.query(query)
    }

    pub fn is_in_cache(&self, key: impl Into<ResourceKey>) -> bool {
        self.index.contains(&key.into())
    }

    /// Records of one domain (or all), most recently imported first
    pub fn list(&self, domain: Option<ResourceDomain>) -> Vec<Resource> {
        self.index.list(domain)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Mod or resource pack downloaded from a CurseForge file
    pub fn find_curseforge(&self, project_id: u64, file_id: u64) -> Option<Resource> {
        let matches = |domain: ResourceDomain| {
            self.index.find(|r| {
                r.domain == domain
                    && r.sources
                        .curseforge
                        .as_ref()
                        .is_some_and(|s| s.project_id == project_id && s.file_id == file_id)
            })
        };
        matches(ResourceDomain::Mods).or_else(|| matches(ResourceDomain::ResourcePacks))
    }

    /// Mod downloaded from a Modrinth version
    pub fn find_modrinth(&self, project_id: &str, version_id: &str) -> Option<Resource> {
        self.index.find(|r| {
            r.domain == ResourceDomain::Mods
                && r.sources
                    .modrinth
                    .as_ref()
                    .is_some_and(|s| s.project_id == project_id && s.version_id == version_id)
        })
    }

    /// Register provenance for content that is about to be imported
    pub fn mark_source(&self, hash: impl Into<String>, sources: ResourceSources) {
        let mut pending = self.pending_sources.lock().unwrap_or_else(|e| e.into_inner());
        let entry = pending.entry(hash.into()).or_default();
        *entry = std::mem::take(entry).overlay(sources);
    }

    fn take_pending_source(&self, hash: &str) -> ResourceSources {
        self.pending_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(hash)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Resolve (parse without importing)
    // ------------------------------------------------------------------

    /// Parse a file without importing it. Known content short-circuits to
    /// the existing record, relocated to `path`.
    pub async fn resolve(&self, request: &ImportRequest) -> Result<ParsedResource> {
        let mut context = ImportContext::new(&request.path);
        if let Some(existing) = self.find_existing(&mut context).await? {
            if existing.domain != ResourceDomain::Unknown {
                return Ok(ParsedResource {
                    resource: Resource {
                        path: request.path.clone(),
                        ..existing
                    },
                    icon: None,
                });
            }
        }
        let identity = context.identity().await?.clone();
        let mut parsed = self
            .parser
            .parse(&request.path, &identity, request.type_hint)
            .await?;
        parsed.resource.prepend_uri(&request.urls);
        Ok(parsed)
    }

    /// [`resolve`](Self::resolve) for several files concurrently, in input order
    pub async fn resolve_many(
        self: &Arc<Self>,
        requests: Vec<ImportRequest>,
    ) -> Vec<Result<ParsedResource>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let service = Arc::clone(self);
                tokio::spawn(async move { service.resolve(&request).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.map_err(ResourceError::from).and_then(|r| r));
        }
        results
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    /// Import one file. Returns `None` when an optional import was skipped.
    #[instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn import(&self, request: ImportRequest) -> Result<Option<Resource>> {
        Ok(self.import_outcome(request).await?.into_resource())
    }

    pub async fn import_outcome(&self, mut request: ImportRequest) -> Result<ImportOutcome> {
        let mut context = ImportContext::new(&request.path);
        let existing = self.find_existing(&mut context).await?;

        if let Some(existing) = existing
            .as_ref()
            .filter(|r| r.domain != ResourceDomain::Unknown)
        {
            debug!(
                "Skip to import {} as resource existed in {}",
                request.path.display(),
                existing.path.display()
            );
            let pending = self.take_pending_source(&existing.hash);
            request.sources = pending.overlay(std::mem::take(&mut request.sources));
            let updated = self.merge_existing(existing, &request).await?;
            return Ok(ImportOutcome::Existing(updated));
        }

        let identity = context.identity().await?.clone();
        if request.restrict_to_domain.is_some()
            && request.optional
            && matches!(identity.file_type, FileType::Unknown | FileType::Directory)
        {
            debug!("Skip optional import of {}", request.path.display());
            return Ok(ImportOutcome::Skipped);
        }

        let pending = self.take_pending_source(&identity.content_id);
        request.sources = pending.overlay(std::mem::take(&mut request.sources));

        let resource = self
            .scheduler
            .run(
                request.background,
                self.import_task(&request, &mut context, existing),
            )
            .await?;

        if resource.domain == ResourceDomain::Modpacks {
            self.emit(ResourceEvent::ModpackImported {
                path: resource.path.clone(),
                name: resource.name.clone(),
            });
        }

        info!(
            "Persist newly added resource {} -> {}",
            resource.path.display(),
            resource.domain
        );
        Ok(ImportOutcome::Imported(resource))
    }

    /// Import many files concurrently. Failures are collected per item and
    /// never abort the other imports.
    #[instrument(skip_all, fields(count = requests.len()))]
    pub async fn import_many(self: &Arc<Self>, requests: Vec<ImportRequest>) -> ImportManyResult {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let path = request.path.clone();
                let service = Arc::clone(self);
                let handle = tokio::spawn(async move { service.import_outcome(request).await });
                (path, handle)
            })
            .collect();

        let mut result = ImportManyResult::default();
        for (path, handle) in handles {
            let outcome = handle.await.map_err(ResourceError::from).and_then(|r| r);
            match outcome {
                Ok(ImportOutcome::Existing(r)) => result.existing.push(r),
                Ok(ImportOutcome::Imported(r)) => result.imported.push(r),
                Ok(ImportOutcome::Skipped) => result.skipped.push(path),
                Err(error) => {
                    warn!("Failed to import {}: {}", path.display(), error);
                    result.errors.push(ImportFailure { path, error });
                }
            }
        }

        info!(
            "Imported {} new resources, {} resources existed, {} failed",
            result.imported.len(),
            result.existing.len(),
            result.errors.len()
        );
        result
    }

    /// Existing record for a file: inode first (with a size check against
    /// inode reuse), then content hash
    async fn find_existing(&self, context: &mut ImportContext) -> Result<Option<Resource>> {
        let stat = context.stat().await?.clone();
        if stat.is_directory {
            return Ok(None);
        }
        if let Some(ino) = stat.ino {
            if let Some(found) = self.index.get(&ResourceKey::Ino(ino)) {
                if found.size == stat.size {
                    return Ok(Some(found));
                }
            }
        }
        let hash = context.identity().await?.content_id.clone();
        Ok(self.index.get(&ResourceKey::Hash(hash)))
    }

    async fn merge_existing(&self, existing: &Resource, request: &ImportRequest) -> Result<Resource> {
        let _gate = self.commit_gate.lock().await;
        let mut current = self
            .index
            .get(&ResourceKey::Hash(existing.hash.clone()))
            .unwrap_or_else(|| existing.clone());
        if !request.merge_into(&mut current) {
            return Ok(current);
        }
        self.persist(current).await
    }

    async fn import_task(
        &self,
        request: &ImportRequest,
        context: &mut ImportContext,
        existing: Option<Resource>,
    ) -> Result<Resource> {
        if context.stat().await?.is_directory {
            return Err(ResourceError::ImportDirectoryRejected(request.path.clone()));
        }
        let identity = context.identity().await?.clone();
        let parsed = self
            .parser
            .parse(&request.path, &identity, request.type_hint)
            .await?;

        let mut resource = parsed.resource;
        resource.hash = identity.content_id;
        resource.prepend_uri(&request.urls);

        if let Some(expected) = request.restrict_to_domain {
            if resource.domain != expected && resource.domain != ResourceDomain::Unknown {
                return Err(ResourceError::DomainMismatch {
                    path: request.path.clone(),
                    expected,
                    actual: resource.domain,
                    actual_type: resource.resource_type,
                });
            }
            resource.domain = expected;
        }

        if let Some(icon) = &request.icon_url {
            resource.icon_url = Some(icon.clone());
        } else if let Some(bytes) = parsed.icon {
            resource.icon_url = Some(self.add_image(bytes).await?);
        }

        resource.sources = std::mem::take(&mut resource.sources).overlay(request.sources.clone());
        resource.tags.extend(request.tags.iter().cloned());

        // Content committed meanwhile (or re-parsed from Unknown) keeps its file
        let settled = existing
            .or_else(|| self.index.get(&ResourceKey::Hash(resource.hash.clone())))
            .filter(Resource::is_persisted);
        let written = match settled {
            Some(previous) => {
                resource.stored_path = previous.stored_path;
                resource.path = previous.path;
                resource.file_name = previous.file_name;
                resource.ino = previous.ino;
                None
            }
            None => {
                let dir = self.domain_dir(resource.domain);
                let stored = materialize(
                    &request.path,
                    &dir,
                    &resource.file_name,
                    &resource.hash,
                    self.config.materialize,
                    &self.markers,
                )
                .await?;
                // Nobody will consume the marker for a domain that is not watched yet
                if !self.is_watching(resource.domain) {
                    self.markers.unmark(&stored);
                }
                let stat = hasher::stat(&stored).await?;
                resource.file_name = stored
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| resource.file_name.clone());
                resource.ino = stat.ino;
                resource.size = stat.size;
                resource.path = stored.clone();
                resource.stored_path = stored.clone();
                Some(stored)
            }
        };

        let committed = self.commit(resource).await?;

        // A concurrent import of the same content won with another file
        if let Some(written) = written {
            if committed.stored_path != written && written != request.path {
                debug!("Drop duplicate copy {}", written.display());
                self.markers.unmark(&written);
                let _ = tokio::fs::remove_file(&written).await;
            }
        }
        Ok(committed)
    }

    /// Merge into any record committed for the same content, then persist
    pub(crate) async fn commit(&self, incoming: Resource) -> Result<Resource> {
        let _gate = self.commit_gate.lock().await;
        let resource = match self.index.get(&ResourceKey::Hash(incoming.hash.clone())) {
            Some(existing) => merge_records(existing, incoming),
            None => incoming,
        };
        self.persist(resource).await
    }

    /// Store first, then index. Callers hold the commit gate.
    async fn persist(&self, resource: Resource) -> Result<Resource> {
        self.store.put(&resource).await?;
        self.index.put(resource.clone());
        self.emit(ResourceEvent::committed(resource.clone()));
        Ok(resource)
    }

    // ------------------------------------------------------------------
    // Update / remove / export / images
    // ------------------------------------------------------------------

    /// Update the metadata of an existing record
    pub async fn update(
        &self,
        key: impl Into<ResourceKey>,
        update: UpdateRequest,
    ) -> Result<Resource> {
        let key = key.into();
        let _gate = self.commit_gate.lock().await;
        let mut resource = self.require(key)?;
        update.apply(&mut resource);
        self.persist(resource).await
    }

    /// Remove a record and its files
    pub async fn remove(&self, key: impl Into<ResourceKey>) -> Result<Resource> {
        let resource = self.require(key)?;
        self.remove_resource(resource).await
    }

    pub(crate) async fn remove_resource(&self, resource: Resource) -> Result<Resource> {
        {
            let _gate = self.commit_gate.lock().await;
            self.store.delete(&resource.hash).await?;
            self.index.discard(&resource.hash);
        }
        if resource.is_persisted() {
            self.markers.unmark(&resource.stored_path);
        }
        self.emit(ResourceEvent::Removed {
            resource: resource.clone(),
        });
        info!("Remove resource {} with its metadata", resource.path.display());

        if resource.is_persisted() {
            if resource.path != resource.stored_path {
                warn!(
                    "Leaving {} in place; only the stored copy is removed",
                    resource.path.display()
                );
            }
            for path in [
                resource.stored_path.clone(),
                resource.stored_path.with_extension("json"),
                resource.stored_path.with_extension("png"),
            ] {
                // The record is gone either way
                if let Err(e) = remove_path(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!("Failed to unlink {}: {}", path.display(), e);
                    }
                }
            }
        }
        Ok(resource)
    }

    /// Copy resources into `target_dir` under their file names.
    ///
    /// Every key is resolved before anything is copied. Copies run
    /// concurrently; existing files in `target_dir` are left untouched. A
    /// failure part-way may leave some copies behind.
    pub async fn export<K>(&self, keys: Vec<K>, target_dir: &Path) -> Result<Vec<PathBuf>>
    where
        K: Into<ResourceKey>,
    {
        let resources = keys
            .into_iter()
            .map(|key| self.require(key))
            .collect::<Result<Vec<_>>>()?;

        tokio::fs::create_dir_all(target_dir).await?;

        let mut copies = JoinSet::new();
        let mut targets = Vec::with_capacity(resources.len());
        for resource in resources {
            let source = if resource.is_persisted() {
                resource.stored_path.clone()
            } else {
                resource.path.clone()
            };
            let target = target_dir.join(&resource.file_name);
            targets.push(target.clone());
            copies.spawn(async move { copy_passively(&source, &target).await });
        }

        let mut first_error: Option<ResourceError> = None;
        while let Some(joined) = copies.join_next().await {
            let result = joined.map_err(ResourceError::from).and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(targets),
        }
    }

    /// Store an image once and return its `image://` reference
    pub async fn add_image(&self, source: impl Into<ImageSource>) -> Result<String> {
        self.images.add(source.into()).await
    }

    pub(crate) fn index(&self) -> &ResourceIndex {
        &self.index
    }

    pub(crate) fn emit(&self, event: ResourceEvent) {
        debug!(kind = event.label(), "emit");
        // The owner may have stopped listening
        let _ = self.events.send(event);
    }
}

/// Fold a freshly imported record into the one already indexed.
///
/// The stored file of the earlier record wins. The domain only moves away
/// from Unknown. Collections only grow.
fn merge_records(mut existing: Resource, incoming: Resource) -> Resource {
    if existing.domain == ResourceDomain::Unknown {
        existing.domain = incoming.domain;
        existing.resource_type = incoming.resource_type;
        existing.name = incoming.name;
    }
    if !existing.is_persisted() {
        existing.stored_path = incoming.stored_path;
        existing.path = incoming.path;
        existing.file_name = incoming.file_name;
        existing.ino = incoming.ino;
    }
    if existing.size == 0 {
        existing.size = incoming.size;
    }
    existing.merge_uri(incoming.uri);
    existing.tags.extend(incoming.tags);
    existing.sources = std::mem::take(&mut existing.sources).overlay(incoming.sources);
    if incoming.icon_url.is_some() {
        existing.icon_url = incoming.icon_url;
    }
    existing
}

fn acquire_lock(path: &Path) -> Result<std::fs::File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| ResourceError::Locked(path.to_path_buf()))?;
    Ok(file)
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Copy unless the target already exists
async fn copy_passively(source: &Path, target: &Path) -> Result<()> {
    if tokio::fs::try_exists(target).await? {
        debug!("Skip export to existing {}", target.display());
        return Ok(());
    }
    tokio::fs::copy(source, target).await?;
    Ok(())
}

/// Bridges watcher callbacks into the service without keeping it alive
struct ServiceHandler {
    service: Weak<ResourceService>,
}

#[async_trait]
impl DomainEventHandler for ServiceHandler {
    async fn file_added(&self, domain: ResourceDomain, path: PathBuf) -> Result<()> {
        let Some(service) = self.service.upgrade() else {
            return Ok(());
        };
        debug!("Try to import new file {}", path.display());
        service
            .import(ImportRequest::new(path).restrict_to(domain).optional())
            .await?;
        Ok(())
    }

    async fn file_removed(&self, _domain: ResourceDomain, path: PathBuf) -> Result<()> {
        let Some(service) = self.service.upgrade() else {
            return Ok(());
        };
        match service.index.get(&ResourceKey::Path(path.clone())) {
            Some(resource) => {
                service.remove_resource(resource).await?;
            }
            None => debug!("Skip to remove untracked resource {}", path.display()),
        }
        Ok(())
    }

    fn fault(&self, domain: ResourceDomain, error: ResourceError) {
        warn!("{} watcher fault: {}", domain, error);
        if let Some(service) = self.service.upgrade() {
            service.emit(ResourceEvent::fault(domain, &error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurseforgeSource, ResourceType};

    #[test]
    fn test_merge_records_keeps_earlier_file() {
        let existing = Resource {
            stored_path: "/lib/mods/a.jar".into(),
            ..Resource::new("h", ResourceType::Mod, "/lib/mods/a.jar").with_uri("https://a")
        };
        let incoming = Resource {
            stored_path: "/lib/mods/a-h.jar".into(),
            sources: ResourceSources {
                curseforge: Some(CurseforgeSource {
                    project_id: 1,
                    file_id: 2,
                }),
                ..Default::default()
            },
            ..Resource::new("h", ResourceType::Mod, "/lib/mods/a-h.jar")
                .with_uri("https://a")
                .with_uri("https://b")
        };

        let merged = merge_records(existing, incoming);
        assert_eq!(merged.stored_path, PathBuf::from("/lib/mods/a.jar"));
        assert_eq!(merged.uri, vec!["https://a", "https://b"]);
        assert!(merged.sources.curseforge.is_some());
    }

    #[test]
    fn test_merge_records_upgrades_unknown_domain_only() {
        let unknown = Resource::new("h", ResourceType::Unknown, "/lib/unknown/a");
        let parsed = Resource::new("h", ResourceType::Mod, "/tmp/a.jar");
        let merged = merge_records(unknown, parsed.clone());
        assert_eq!(merged.domain, ResourceDomain::Mods);

        let save = Resource::new("h", ResourceType::Save, "/lib/saves/w");
        let merged = merge_records(save, parsed);
        assert_eq!(merged.domain, ResourceDomain::Saves);
    }
}
