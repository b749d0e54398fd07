//! Model file discovery.
//!
//! The catalog scans directories (non-recursively) for files whose extension
//! is on the allow-list and keeps the resulting records grouped by directory.
//! Nothing is loaded here.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::file::{
    normalize_extension, normalize_file_path, normalize_path, ModelFileRecord, ModelFileType,
};

/// Per-directory record lists, in the order directories were stored.
#[derive(Debug, Clone)]
pub struct Catalog {
    extensions: Vec<String>,
    directories: Vec<(PathBuf, Vec<ModelFileRecord>)>,
}

impl Catalog {
    /// Create an empty catalog recognizing `extensions` (case-insensitive,
    /// leading dot optional).
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let mut normalized: Vec<String> = Vec::with_capacity(extensions.len());
        for ext in extensions {
            let ext = normalize_extension(ext.as_ref());
            if !ext.is_empty() && !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }

        Self {
            extensions: normalized,
            directories: Vec::new(),
        }
    }

    /// The active extension allow-list.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether `path` carries a recognized model extension.
    pub fn is_recognized(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = normalize_extension(&ext.to_string_lossy());
                self.extensions.contains(&ext)
            })
            .unwrap_or(false)
    }

    /// Scan `directory` for model files without storing the result.
    ///
    /// Only regular files directly inside the directory are considered.
    /// Records are sorted by file name.
    pub fn scan(&self, directory: &Path) -> Result<Vec<ModelFileRecord>> {
        let directory = normalize_path(directory);
        if !directory.is_dir() {
            return Err(Error::DirectoryNotFound(directory));
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {:?}: {}", directory, e);
                    continue;
                }
            };

            // Under the normalized directory, so this matches `normalize_file_path`
            let path = entry.path();
            if !self.is_recognized(&path) {
                continue;
            }

            // Follows symlinks so linked model files are picked up
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::warn!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default();

            records.push(ModelFileRecord {
                file_name: entry.file_name().to_string_lossy().to_string(),
                path,
                file_type: ModelFileType::from_extension(&extension),
                size_bytes: metadata.len(),
            });
        }

        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        log::debug!(
            "Scanned {:?}: {} model file(s)",
            directory,
            records.len()
        );

        Ok(records)
    }

    /// Every stored record, grouped by directory in insertion order.
    pub fn list_all(&self) -> Vec<ModelFileRecord> {
        self.records().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ModelFileRecord> {
        self.directories.iter().flat_map(|(_, records)| records.iter())
    }

    /// Records stored for one directory.
    pub fn records_in(&self, directory: &Path) -> Option<&[ModelFileRecord]> {
        let directory = normalize_path(directory);
        self.directories
            .iter()
            .find(|(dir, _)| *dir == directory)
            .map(|(_, records)| records.as_slice())
    }

    /// Look up a record by its path (relative paths are resolved first).
    ///
    /// A symlinked model file is found under its own path, not its target's.
    pub fn find_by_path(&self, path: &Path) -> Option<&ModelFileRecord> {
        let path = normalize_file_path(path);
        self.records().find(|record| record.path == path)
    }

    /// First record with the given file name.
    pub fn find_by_name(&self, file_name: &str) -> Option<&ModelFileRecord> {
        self.records().find(|record| record.file_name == file_name)
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.directories.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store (or replace) the records for an already-normalized directory.
    pub(crate) fn store(&mut self, directory: PathBuf, records: Vec<ModelFileRecord>) {
        match self.directories.iter_mut().find(|(dir, _)| *dir == directory) {
            Some((_, existing)) => *existing = records,
            None => self.directories.push((directory, records)),
        }
    }

    /// Drop the records for an already-normalized directory.
    pub(crate) fn discard(&mut self, directory: &Path) -> Option<Vec<ModelFileRecord>> {
        let index = self
            .directories
            .iter()
            .position(|(dir, _)| dir.as_path() == directory)?;
        Some(self.directories.remove(index).1)
    }

    pub(crate) fn clear(&mut self) {
        self.directories.clear();
    }
}
