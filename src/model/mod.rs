//! Model discovery and caching for Larder.

pub mod cache;
pub mod catalog;
pub mod directories;
pub mod file;
pub(crate) mod locks;

pub use cache::{LoadedModel, Lookup, ModelCache};
pub use catalog::Catalog;
pub use directories::{DirectoryEntry, DirectorySet};
pub use file::{ModelFileRecord, ModelFileType};
