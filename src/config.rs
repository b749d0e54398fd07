//! Manager configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Defaults applied to every [`ModelParams`](crate::ModelParams) before the
/// caller's configure callback runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDefaults {
    #[serde(default = "defaults::gpu_layer_count")]
    pub gpu_layer_count: i32,
    #[serde(default = "defaults::main_gpu")]
    pub main_gpu: i32,
    #[serde(default = "defaults::seed")]
    pub seed: u32,
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default = "defaults::use_mmap")]
    pub use_mmap: bool,
    #[serde(default = "defaults::use_mlock")]
    pub use_mlock: bool,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        Self {
            gpu_layer_count: defaults::GPU_LAYER_COUNT,
            main_gpu: defaults::MAIN_GPU,
            seed: defaults::SEED,
            context_size: None,
            batch_size: defaults::BATCH_SIZE,
            threads: None,
            use_mmap: defaults::USE_MMAP,
            use_mlock: defaults::USE_MLOCK,
        }
    }
}

/// Configuration for a [`ModelManager`](crate::ModelManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directories probed at construction time
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Recognized model-file extensions, without the leading dot
    #[serde(default = "defaults::extensions")]
    pub extensions: Vec<String>,
    /// Defaults for every load
    #[serde(default)]
    pub params: ParamDefaults,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            extensions: defaults::extensions(),
            params: ParamDefaults::default(),
        }
    }
}

impl ManagerConfig {
    /// Config probing the given directories, everything else default.
    pub fn with_directories<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Per-user models directory, `<data_local_dir>/larder/models`.
    pub fn default_models_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("larder")
            .join("models")
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never match a model file.
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one model extension is required".into(),
            ));
        }

        if let Some(bad) = self
            .extensions
            .iter()
            .find(|ext| ext.trim().trim_start_matches('.').is_empty())
        {
            return Err(Error::InvalidConfig(format!(
                "blank model extension {:?}",
                bad
            )));
        }

        Ok(())
    }
}
