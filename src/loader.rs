//! The seam between the manager and whatever actually reads model weights.
//!
//! Hosts implement [`ModelLoader`] (or [`BlockingModelLoader`] wrapped in a
//! [`BlockingLoader`]) and return a [`ModelHandle`] per successful load. The
//! manager never inspects the handle beyond its name and metadata, and calls
//! [`ModelHandle::release`] exactly once.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::config::ParamDefaults;
use crate::defaults;
use crate::error::{Error, Result};

/// Parameters handed to the external loader.
///
/// Built by the manager from the source path and the configured defaults,
/// then adjusted by the caller's one-shot configure callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Absolute path of the model file
    pub model_path: PathBuf,
    /// Number of layers to offload to the GPU
    #[serde(default = "defaults::gpu_layer_count")]
    pub gpu_layer_count: i32,
    /// GPU used for scratch and small tensors
    #[serde(default = "defaults::main_gpu")]
    pub main_gpu: i32,
    /// RNG seed (`u32::MAX` lets the loader pick one)
    #[serde(default = "defaults::seed")]
    pub seed: u32,
    /// Context length hint; `None` uses the model's trained length
    #[serde(default)]
    pub context_size: Option<u32>,
    /// Logical batch size hint
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
    /// Worker threads hint; `None` lets the loader decide
    #[serde(default)]
    pub threads: Option<u32>,
    /// Memory-map the file instead of reading it
    #[serde(default = "defaults::use_mmap")]
    pub use_mmap: bool,
    /// Pin the mapped weights in RAM
    #[serde(default = "defaults::use_mlock")]
    pub use_mlock: bool,
}

impl ModelParams {
    /// Parameters for `model_path` with the built-in defaults.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self::with_defaults(model_path, &ParamDefaults::default())
    }

    /// Parameters for `model_path` seeded from configured defaults.
    pub fn with_defaults(model_path: impl Into<PathBuf>, defaults: &ParamDefaults) -> Self {
        Self {
            model_path: model_path.into(),
            gpu_layer_count: defaults.gpu_layer_count,
            main_gpu: defaults.main_gpu,
            seed: defaults.seed,
            context_size: defaults.context_size,
            batch_size: defaults.batch_size,
            threads: defaults.threads,
            use_mmap: defaults.use_mmap,
            use_mlock: defaults.use_mlock,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// An in-memory model instance produced by a [`ModelLoader`].
pub trait ModelHandle: Send + Sync {
    /// Name embedded in the model itself (e.g. `general.name` in GGUF metadata).
    ///
    /// Used as the cache identifier when the caller does not supply one. An
    /// empty name falls back to the file stem.
    fn model_name(&self) -> &str;

    /// Key/value metadata read from the model.
    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Free the resources held by this instance.
    ///
    /// Called at most once; the handle is dropped right after.
    fn release(&mut self) -> Result<()>;

    /// Access to the concrete type for [`LoadedModel::with_handle_as`](crate::LoadedModel::with_handle_as).
    fn as_any(&self) -> &dyn Any;
}

/// Loads model files into memory.
///
/// Implementations should poll `cancel` between expensive steps and return
/// [`Error::Cancelled`] when it fires. Any other failure should be reported
/// as [`Error::Load`]; it reaches the caller unchanged.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ModelHandle>>;
}

/// Synchronous loader for CPU/IO-bound loading code.
///
/// Wrap it in a [`BlockingLoader`] to run it on the blocking worker pool.
pub trait BlockingModelLoader: Send + Sync + 'static {
    fn load_blocking(
        &self,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ModelHandle>>;
}

/// Adapter running a [`BlockingModelLoader`] via `tokio::task::spawn_blocking`.
pub struct BlockingLoader<L> {
    inner: Arc<L>,
}

impl<L: BlockingModelLoader> BlockingLoader<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: BlockingModelLoader> ModelLoader for BlockingLoader<L> {
    async fn load(
        &self,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ModelHandle>> {
        let inner = Arc::clone(&self.inner);
        let params = params.clone();
        let cancel = cancel.clone();

        // If the awaiting future is dropped, the guard releases whatever the
        // worker produced instead of leaking it.
        let guard = tokio::task::spawn_blocking(move || {
            inner
                .load_blocking(&params, &cancel)
                .map(|handle| PendingHandle::new(handle, params.model_path))
        })
        .await
        .map_err(|e| Error::load(format!("loader task failed: {}", e)))??;

        Ok(guard.into_inner())
    }
}

/// Releases a handle on drop unless it was taken out with `into_inner`.
struct PendingHandle {
    handle: Option<Box<dyn ModelHandle>>,
    path: PathBuf,
}

impl PendingHandle {
    fn new(handle: Box<dyn ModelHandle>, path: PathBuf) -> Self {
        Self {
            handle: Some(handle),
            path,
        }
    }

    fn into_inner(mut self) -> Box<dyn ModelHandle> {
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("pending handle taken twice"),
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            log::warn!(
                "Releasing model loaded from {:?} after its load was abandoned",
                self.path
            );
            if let Err(e) = handle.release() {
                log::error!("Failed to release abandoned model {:?}: {}", self.path, e);
            }
        }
    }
}
