//! Loaded models and the identifier-keyed cache that owns them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::loader::{ModelHandle, ModelParams};

/// A model held in memory under a resolved identifier.
///
/// Wraps the external handle so that it is released exactly once. Access
/// after release fails with [`Error::Released`]. Release waits for any
/// in-progress [`with_handle`](Self::with_handle) call to finish, so a handle
/// is never freed while borrowed.
///
/// Dropping the last reference to a model that was never released releases
/// it.
pub struct LoadedModel {
    model_id: String,
    params: ModelParams,
    metadata: HashMap<String, String>,
    handle: StdRwLock<Option<Box<dyn ModelHandle>>>,
}

impl LoadedModel {
    pub(crate) fn new(model_id: String, params: ModelParams, handle: Box<dyn ModelHandle>) -> Self {
        let metadata = handle.metadata();
        Self {
            model_id,
            params,
            metadata,
            handle: StdRwLock::new(Some(handle)),
        }
    }

    /// Cache identifier.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Source file.
    pub fn path(&self) -> &Path {
        &self.params.model_path
    }

    /// Parameters the model was loaded with.
    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Metadata reported by the handle at load time.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn is_released(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `f` against the live handle.
    ///
    /// Must not be called re-entrantly with an unload of the same model from
    /// inside `f`.
    pub fn with_handle<R>(&self, f: impl FnOnce(&dyn ModelHandle) -> R) -> Result<R> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_deref() {
            Some(handle) => Ok(f(handle)),
            None => Err(Error::Released(self.model_id.clone())),
        }
    }

    /// Run `f` against the handle downcast to the loader's concrete type.
    ///
    /// `Ok(None)` if the handle is not a `T`.
    pub fn with_handle_as<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<Option<R>> {
        self.with_handle(|handle| handle.as_any().downcast_ref::<T>().map(f))
    }

    /// Release the handle. `Ok(false)` if it was already released.
    pub(crate) fn release(&self) -> Result<bool> {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(mut handle) => {
                handle.release().map_err(|e| Error::Release {
                    model_id: self.model_id.clone(),
                    message: e.to_string(),
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        let slot = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut handle) = slot.take() {
            log::debug!("Releasing dropped model '{}'", self.model_id);
            if let Err(e) = handle.release() {
                log::error!("Failed to release model '{}': {}", self.model_id, e);
            }
        }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.model_id)
            .field("path", &self.params.model_path)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Result of looking a model up by identifier.
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(Arc<LoadedModel>),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn into_option(self) -> Option<Arc<LoadedModel>> {
        match self {
            Self::Found(model) => Some(model),
            Self::NotFound => None,
        }
    }
}

impl From<Option<Arc<LoadedModel>>> for Lookup {
    fn from(model: Option<Arc<LoadedModel>>) -> Self {
        match model {
            Some(model) => Self::Found(model),
            None => Self::NotFound,
        }
    }
}

/// Identifier → loaded model map with unique keys.
///
/// Reads run concurrently; inserts and removes are exclusive. The cache
/// never releases handles itself, callers do that after removal.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, model_id: &str) -> Option<Arc<LoadedModel>> {
        let models = self.models.read().await;
        models.get(model_id).cloned()
    }

    pub async fn contains(&self, model_id: &str) -> bool {
        let models = self.models.read().await;
        models.contains_key(model_id)
    }

    /// Insert under the model's own identifier.
    ///
    /// Fails with [`Error::DuplicateKey`] if the identifier is taken; the
    /// existing entry is left untouched.
    pub async fn insert(&self, model: Arc<LoadedModel>) -> Result<()> {
        let mut models = self.models.write().await;
        if models.contains_key(model.model_id()) {
            return Err(Error::DuplicateKey(model.model_id().to_string()));
        }
        models.insert(model.model_id().to_string(), model);
        Ok(())
    }

    pub async fn remove(&self, model_id: &str) -> Option<Arc<LoadedModel>> {
        let mut models = self.models.write().await;
        models.remove(model_id)
    }

    /// Remove and return every entry.
    pub async fn drain(&self) -> Vec<Arc<LoadedModel>> {
        let mut models = self.models.write().await;
        let mut drained: Vec<_> = models.drain().map(|(_, model)| model).collect();
        drained.sort_by(|a, b| a.model_id().cmp(b.model_id()));
        drained
    }

    /// Every cached model, sorted by identifier.
    pub async fn list_all(&self) -> Vec<Arc<LoadedModel>> {
        let models = self.models.read().await;
        let mut all: Vec<_> = models.values().cloned().collect();
        all.sort_by(|a, b| a.model_id().cmp(b.model_id()));
        all
    }

    pub async fn ids(&self) -> Vec<String> {
        let models = self.models.read().await;
        let mut ids: Vec<_> = models.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        let models = self.models.read().await;
        models.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
