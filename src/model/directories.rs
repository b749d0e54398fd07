//! The set of directories probed for model files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::catalog::Catalog;
use crate::model::file::{lexical_absolute, normalize_path};

/// A probed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Absolute, normalized path
    pub path: PathBuf,
    /// Model files found by the last scan
    pub file_count: usize,
}

/// Deduplicated directory list plus the catalog of what each one contains.
///
/// Adding a directory scans it immediately; adding one that is already
/// present (after normalization) is a no-op. The spellings a directory was
/// added under are remembered, so a directory reached through a symlink can
/// still be removed by that spelling after it is gone from disk.
#[derive(Debug, Clone)]
pub struct DirectorySet {
    entries: Vec<DirectoryEntry>,
    /// Lexical spelling -> normalized path, for spellings that differ
    aliases: Vec<(PathBuf, PathBuf)>,
    catalog: Catalog,
}

impl DirectorySet {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            entries: Vec::new(),
            aliases: Vec::new(),
            catalog,
        }
    }

    /// Add and scan a directory.
    ///
    /// Returns `Ok(false)` if it was already present. A missing directory is
    /// [`Error::DirectoryNotFound`] and leaves the set unchanged.
    pub fn add(&mut self, directory: &Path) -> Result<bool> {
        let path = normalize_path(directory);
        if self.position(&path).is_some() {
            log::debug!("Directory {:?} already probed", path);
            self.remember_alias(directory, &path);
            return Ok(false);
        }

        let records = self.catalog.scan(&path)?;
        log::info!(
            "Added model directory {:?} ({} model file(s))",
            path,
            records.len()
        );

        self.entries.push(DirectoryEntry {
            path: path.clone(),
            file_count: records.len(),
        });
        self.remember_alias(directory, &path);
        self.catalog.store(path, records);
        Ok(true)
    }

    /// Add several directories, logging and skipping the ones that fail.
    ///
    /// Returns how many were newly added.
    pub fn add_all<I, P>(&mut self, directories: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut added = 0;
        for directory in directories {
            let directory = directory.as_ref();
            match self.add(directory) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Skipping model directory {:?}: {}", directory, e),
            }
        }
        added
    }

    /// Remove a directory and its records. Returns whether it was present.
    pub fn remove(&mut self, directory: &Path) -> bool {
        let Some(index) = self.find(directory) else {
            return false;
        };

        let entry = self.entries.remove(index);
        self.aliases.retain(|(_, target)| *target != entry.path);
        self.catalog.discard(&entry.path);
        log::info!("Removed model directory {:?}", entry.path);
        true
    }

    /// Re-scan a directory that is already in the set, replacing its records.
    ///
    /// Returns the new file count.
    pub fn rescan(&mut self, directory: &Path) -> Result<usize> {
        let index = self
            .find(directory)
            .ok_or_else(|| Error::DirectoryNotFound(normalize_path(directory)))?;

        let path = self.entries[index].path.clone();
        let records = self.catalog.scan(&path)?;
        let count = records.len();

        self.entries[index].file_count = count;
        self.catalog.store(path, records);
        Ok(count)
    }

    /// Remove every directory and record.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.catalog.clear();
    }

    /// Probed directories in insertion order.
    pub fn list(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|entry| entry.path.clone()).collect()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.find(directory).is_some()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, normalized: &Path) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.path.as_path() == normalized)
    }

    fn find(&self, directory: &Path) -> Option<usize> {
        if let Some(index) = self.position(&normalize_path(directory)) {
            return Some(index);
        }

        let spelling = lexical_absolute(directory);
        let (_, target) = self.aliases.iter().find(|(alias, _)| *alias == spelling)?;
        self.position(target)
    }

    fn remember_alias(&mut self, directory: &Path, normalized: &Path) {
        let spelling = lexical_absolute(directory);
        if spelling != normalized && !self.aliases.iter().any(|(alias, _)| *alias == spelling) {
            self.aliases.push((spelling, normalized.to_path_buf()));
        }
    }
}
