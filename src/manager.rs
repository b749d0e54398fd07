//! Model lifecycle management.
//!
//! [`ModelManager`] ties together the directory set, the file catalog and the
//! model cache:
//! - directories are scanned when added, never loaded
//! - `load` runs the external loader and caches the result under a unique id
//! - `unload` / `unload_all` release handles exactly once
//!
//! Loads and unloads of the same identifier are serialized through a
//! per-identifier lock. For explicit identifiers the lock is held for the
//! whole load, so a concurrent `unload` of that id waits for the load to
//! finish. Identifiers derived from the model's own name are only known once
//! the loader returns; duplicates are then caught at insertion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cancel::CancellationToken;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::loader::{ModelLoader, ModelParams};
use crate::model::file::normalize_file_path;
use crate::model::locks::KeyLocks;
use crate::model::{
    Catalog, DirectoryEntry, DirectorySet, LoadedModel, Lookup, ModelCache, ModelFileRecord,
};

type Configure = Box<dyn FnOnce(&mut ModelParams) + Send>;

/// A request to load one model file.
///
/// ```rust,no_run
/// use larder::{CancellationToken, LoadRequest, ModelManager};
///
/// async fn example(manager: &ModelManager) -> larder::Result<()> {
///     let cancel = CancellationToken::new();
///     let model = manager
///         .load(
///             LoadRequest::new("models/llama-2-7b.Q4_K_M.gguf")
///                 .model_id("llama")
///                 .configure(|params| {
///                     params.gpu_layer_count = 1;
///                     params.seed = 12;
///                 })
///                 .cancellation(cancel.clone()),
///         )
///         .await?;
///     assert_eq!(model.model_id(), "llama");
///     Ok(())
/// }
/// ```
pub struct LoadRequest {
    path: PathBuf,
    model_id: Option<String>,
    configure: Option<Configure>,
    cancel: Option<CancellationToken>,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            model_id: None,
            configure: None,
            cancel: None,
        }
    }

    /// Cache the model under `model_id` instead of the model's own name.
    /// A blank id is ignored.
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        self.model_id = if model_id.trim().is_empty() {
            None
        } else {
            Some(model_id)
        };
        self
    }

    /// Adjust the load parameters. Runs once, before the loader starts.
    pub fn configure(mut self, configure: impl FnOnce(&mut ModelParams) + Send + 'static) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRequest")
            .field("path", &self.path)
            .field("model_id", &self.model_id)
            .field("configure", &self.configure.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Outcome of [`ModelManager::unload_all`].
#[derive(Debug, Default)]
pub struct UnloadReport {
    /// Identifiers whose handles were released
    pub released: Vec<String>,
    /// Identifiers whose release failed; they are no longer cached either
    pub failures: Vec<(String, Error)>,
}

impl UnloadReport {
    /// True if every handle released cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.released.len() + self.failures.len()
    }
}

/// Snapshot of manager state and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub loaded_count: usize,
    pub directory_count: usize,
    pub file_count: usize,
    pub load_count: u64,
    pub unload_count: u64,
    pub load_failures: u64,
    pub cancelled_loads: u64,
    pub duplicate_rejections: u64,
    pub release_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicU64,
    unloads: AtomicU64,
    load_failures: AtomicU64,
    cancelled: AtomicU64,
    duplicates: AtomicU64,
    release_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Discovers, loads, caches and releases models.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct ModelManager {
    config: ManagerConfig,
    loader: Arc<dyn ModelLoader>,
    directories: RwLock<DirectorySet>,
    cache: ModelCache,
    key_locks: KeyLocks,
    counters: Counters,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    /// Create a manager and scan the configured directories.
    ///
    /// Directories that cannot be scanned are logged and skipped.
    pub fn new(config: ManagerConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        config.validate()?;

        let mut directories = DirectorySet::new(Catalog::new(&config.extensions));
        let added = directories.add_all(&config.directories);

        log::info!(
            "ModelManager created: {} of {} directories, {} model file(s)",
            added,
            config.directories.len(),
            directories.catalog().len()
        );

        Ok(Self {
            config,
            loader,
            directories: RwLock::new(directories),
            cache: ModelCache::new(),
            key_locks: KeyLocks::new(),
            counters: Counters::default(),
        })
    }

    /// Convenience constructor taking the loader by value.
    pub fn with_loader<L: ModelLoader + 'static>(config: ManagerConfig, loader: L) -> Result<Self> {
        Self::new(config, Arc::new(loader))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ----- directories -----------------------------------------------------

    /// Add and scan a directory. `Ok(false)` if it was already probed.
    pub async fn add_directory(&self, directory: impl AsRef<Path>) -> Result<bool> {
        let mut directories = self.directories.write().await;
        directories.add(directory.as_ref())
    }

    /// Add several directories, skipping (and logging) the ones that fail.
    pub async fn add_directories<I, P>(&self, directories: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut set = self.directories.write().await;
        set.add_all(directories)
    }

    pub async fn remove_directory(&self, directory: impl AsRef<Path>) -> bool {
        let mut directories = self.directories.write().await;
        directories.remove(directory.as_ref())
    }

    /// Re-scan a probed directory. Returns its new file count.
    pub async fn rescan_directory(&self, directory: impl AsRef<Path>) -> Result<usize> {
        let mut directories = self.directories.write().await;
        directories.rescan(directory.as_ref())
    }

    pub async fn clear_directories(&self) {
        let mut directories = self.directories.write().await;
        directories.clear();
        log::info!("Cleared all model directories");
    }

    pub async fn directories(&self) -> Vec<PathBuf> {
        self.directories.read().await.list()
    }

    pub async fn directory_entries(&self) -> Vec<DirectoryEntry> {
        self.directories.read().await.entries().to_vec()
    }

    /// Every model file found in the probed directories.
    pub async fn model_files(&self) -> Vec<ModelFileRecord> {
        self.directories.read().await.catalog().list_all()
    }

    pub async fn find_model_file(&self, path: impl AsRef<Path>) -> Option<ModelFileRecord> {
        let directories = self.directories.read().await;
        directories.catalog().find_by_path(path.as_ref()).cloned()
    }

    // ----- loading ---------------------------------------------------------

    /// Load a model file and cache it.
    ///
    /// Fails with [`Error::DuplicateKey`] if the resolved identifier is
    /// already cached, [`Error::Cancelled`] if the request's token fires
    /// before the model is cached, or whatever error the loader returned.
    /// A handle produced by the loader is released on every failure path.
    pub async fn load(&self, request: LoadRequest) -> Result<Arc<LoadedModel>> {
        let LoadRequest {
            path,
            model_id,
            configure,
            cancel,
        } = request;
        let cancel = cancel.unwrap_or_default();

        let path = normalize_file_path(&path);
        if !path.is_file() {
            Counters::bump(&self.counters.load_failures);
            return Err(Error::ModelFileNotFound(path));
        }

        // Explicit ids are locked for the whole load and checked up front.
        let explicit_guard = match model_id.as_deref() {
            Some(id) => {
                let guard = self.key_locks.acquire(id).await;
                if self.cache.contains(id).await {
                    Counters::bump(&self.counters.duplicates);
                    log::warn!("Refusing to load {:?}: '{}' is already loaded", path, id);
                    return Err(Error::DuplicateKey(id.to_string()));
                }
                Some(guard)
            }
            None => None,
        };

        if cancel.is_cancelled() {
            Counters::bump(&self.counters.cancelled);
            log::info!("Load of {:?} cancelled before it started", path);
            return Err(Error::Cancelled);
        }

        let mut params = ModelParams::with_defaults(&path, &self.config.params);
        if let Some(configure) = configure {
            configure(&mut params);
        }
        // The callback may not retarget the load
        params.model_path = path.clone();

        log::info!("Loading model from {:?}", path);
        let handle = match self.loader.load(&params, &cancel).await {
            Ok(handle) => handle,
            Err(Error::Cancelled) => {
                Counters::bump(&self.counters.cancelled);
                log::info!("Load of {:?} cancelled by the loader", path);
                return Err(Error::Cancelled);
            }
            Err(e) => {
                Counters::bump(&self.counters.load_failures);
                log::warn!("Failed to load {:?}: {}", path, e);
                return Err(e);
            }
        };

        let model_id = model_id.unwrap_or_else(|| derive_model_id(handle.model_name(), &path));
        let model = Arc::new(LoadedModel::new(model_id, params, handle));

        if cancel.is_cancelled() {
            Counters::bump(&self.counters.cancelled);
            self.discard(&model, "load was cancelled").await;
            return Err(Error::Cancelled);
        }

        let _derived_guard = match explicit_guard {
            Some(_) => None,
            None => {
                tokio::select! {
                    guard = self.key_locks.acquire(model.model_id()) => Some(guard),
                    _ = cancel.cancelled() => {
                        Counters::bump(&self.counters.cancelled);
                        self.discard(&model, "load was cancelled").await;
                        return Err(Error::Cancelled);
                    }
                }
            }
        };

        // The token may have fired while the key lock was being won
        if cancel.is_cancelled() {
            Counters::bump(&self.counters.cancelled);
            self.discard(&model, "load was cancelled").await;
            return Err(Error::Cancelled);
        }

        if let Err(e) = self.cache.insert(Arc::clone(&model)).await {
            Counters::bump(&self.counters.duplicates);
            self.discard(&model, "identifier is already loaded").await;
            return Err(e);
        }

        Counters::bump(&self.counters.loads);
        log::info!("Loaded model '{}' from {:?}", model.model_id(), model.path());
        Ok(model)
    }

    /// Load with default parameters, cached under the model's own name.
    pub async fn load_path(&self, path: impl Into<PathBuf>) -> Result<Arc<LoadedModel>> {
        self.load(LoadRequest::new(path)).await
    }

    /// Release a model that was loaded but will not be cached.
    async fn discard(&self, model: &Arc<LoadedModel>, reason: &str) {
        log::warn!(
            "Releasing model '{}' from {:?}: {}",
            model.model_id(),
            model.path(),
            reason
        );
        if let Err(e) = release_blocking(Arc::clone(model)).await {
            Counters::bump(&self.counters.release_failures);
            log::error!("{}", e);
        }
    }

    // ----- unloading -------------------------------------------------------

    /// Remove a model from the cache and release it.
    ///
    /// `Ok(false)` if nothing is cached under `model_id`. If the release
    /// itself fails the model is still removed and the error returned.
    pub async fn unload(&self, model_id: &str) -> Result<bool> {
        let _guard = self.key_locks.acquire(model_id).await;

        let Some(model) = self.cache.remove(model_id).await else {
            log::debug!("Unload of '{}' ignored: not loaded", model_id);
            return Ok(false);
        };

        Counters::bump(&self.counters.unloads);
        match release_blocking(model).await {
            Ok(_) => {
                log::info!("Unloaded model '{}'", model_id);
                Ok(true)
            }
            Err(e) => {
                Counters::bump(&self.counters.release_failures);
                log::error!("{}", e);
                Err(e)
            }
        }
    }

    /// Release every cached model.
    ///
    /// Failures are collected and do not stop the sweep.
    pub async fn unload_all(&self) -> UnloadReport {
        let models = self.cache.drain().await;
        let mut report = UnloadReport::default();

        for model in models {
            Counters::bump(&self.counters.unloads);
            let model_id = model.model_id().to_string();
            match release_blocking(model).await {
                Ok(_) => report.released.push(model_id),
                Err(e) => {
                    Counters::bump(&self.counters.release_failures);
                    log::error!("{}", e);
                    report.failures.push((model_id, e));
                }
            }
        }

        log::info!(
            "Unloaded {} model(s), {} release failure(s)",
            report.released.len(),
            report.failures.len()
        );
        report
    }

    // ----- queries ---------------------------------------------------------

    pub async fn try_get_loaded(&self, model_id: &str) -> Lookup {
        Lookup::from(self.cache.get(model_id).await)
    }

    /// Every cached model, sorted by identifier.
    pub async fn list_loaded(&self) -> Vec<Arc<LoadedModel>> {
        self.cache.list_all().await
    }

    pub async fn loaded_ids(&self) -> Vec<String> {
        self.cache.ids().await
    }

    pub async fn is_loaded(&self, model_id: &str) -> bool {
        self.cache.contains(model_id).await
    }

    pub async fn loaded_count(&self) -> usize {
        self.cache.len().await
    }

    /// Metadata the loader reported for a cached model.
    pub async fn model_metadata(&self, model_id: &str) -> Option<HashMap<String, String>> {
        self.cache
            .get(model_id)
            .await
            .map(|model| model.metadata().clone())
    }

    pub async fn stats(&self) -> ManagerStats {
        let (directory_count, file_count) = {
            let directories = self.directories.read().await;
            (directories.len(), directories.catalog().len())
        };

        ManagerStats {
            loaded_count: self.cache.len().await,
            directory_count,
            file_count,
            load_count: self.counters.loads.load(Ordering::Relaxed),
            unload_count: self.counters.unloads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
            cancelled_loads: self.counters.cancelled.load(Ordering::Relaxed),
            duplicate_rejections: self.counters.duplicates.load(Ordering::Relaxed),
            release_failures: self.counters.release_failures.load(Ordering::Relaxed),
        }
    }
}

/// Release on the blocking pool: freeing a model can be slow and waits for
/// any in-progress `with_handle` call.
async fn release_blocking(model: Arc<LoadedModel>) -> Result<bool> {
    let model_id = model.model_id().to_string();
    tokio::task::spawn_blocking(move || model.release())
        .await
        .map_err(|e| Error::Release {
            model_id,
            message: format!("release task failed: {}", e),
        })?
}

/// Cache id for a model loaded without an explicit one: its intrinsic name,
/// else the file stem.
fn derive_model_id(model_name: &str, path: &Path) -> String {
    let name = model_name.trim();
    if !name.is_empty() {
        return name.to_string();
    }

    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
