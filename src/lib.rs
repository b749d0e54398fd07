//! Larder - discovery, loading and lifecycle management for on-disk model files.

mod defaults;
pub mod error;

pub mod cancel;
pub mod config;
pub mod loader;
pub mod manager;
pub mod model;

pub use error::{Error, Result};

pub use cancel::CancellationToken;
pub use config::{ManagerConfig, ParamDefaults};
pub use loader::{BlockingLoader, BlockingModelLoader, ModelHandle, ModelLoader, ModelParams};
pub use manager::{LoadRequest, ManagerStats, ModelManager, UnloadReport};

pub use model::{
    Catalog, DirectoryEntry, DirectorySet, LoadedModel, Lookup, ModelCache, ModelFileRecord,
    ModelFileType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
