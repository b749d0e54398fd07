//! Model file records and path normalization.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Kind of model file, derived from its extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFileType {
    /// Native model format
    Gguf,
    /// Any additional configured extension (lowercased, no dot)
    Other(String),
}

impl ModelFileType {
    pub fn from_extension(extension: &str) -> Self {
        let extension = normalize_extension(extension);
        if extension == defaults::MODEL_EXTENSION {
            Self::Gguf
        } else {
            Self::Other(extension)
        }
    }
}

impl std::fmt::Display for ModelFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gguf => write!(f, "GGUF"),
            Self::Other(ext) => write!(f, "{}", ext.to_uppercase()),
        }
    }
}

/// Metadata for one model file found by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFileRecord {
    /// File name including extension
    pub file_name: String,
    /// Absolute path
    pub path: PathBuf,
    /// Type tag from the extension
    pub file_type: ModelFileType,
    /// Size on disk
    pub size_bytes: u64,
}

/// Lowercase and strip a leading dot: `".GGUF"` -> `"gguf"`.
pub(crate) fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// Absolute form of `path` used as an identity key.
///
/// Existing paths are canonicalized (symlinks and `..` resolved). Paths that
/// no longer exist are made absolute against the working directory and
/// cleaned lexically.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| lexical_absolute(path))
}

/// Identity key for a file: the parent directory is normalized with
/// [`normalize_path`] but the file name is kept, so a symlinked model file
/// keeps the path it is listed under instead of resolving to its target.
pub(crate) fn normalize_file_path(path: &Path) -> PathBuf {
    let absolute = lexical_absolute(path);
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => normalize_path(parent).join(name),
        _ => absolute,
    }
}

pub(crate) fn lexical_absolute(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
