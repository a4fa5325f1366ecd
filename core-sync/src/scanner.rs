//! # Directory scanning
//!
//! Maps logical roots (`config/`, `saves/`, `states/`, `thumbnails/`,
//! `system/`) to local directories, builds the sorted list of files currently on
//! disk, and resolves manifest keys back to absolute paths.

use crate::error::{Result, SyncError};
use crate::manifest::{key_cmp, Keyed};
use core_runtime::config::CloudSyncConfig;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A logical root and the directory backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRoot {
    pub name: String,
    pub path: PathBuf,
}

/// The set of roots taking part in a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryMap {
    roots: Vec<SyncRoot>,
}

impl DirectoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.roots.push(SyncRoot {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Build the map from the enabled roots of `config`.
    ///
    /// `saves/` and `states/` share one switch.
    pub fn from_config(config: &CloudSyncConfig) -> Result<Self> {
        let dirs = &config.directories;
        let wanted = [
            (config.sync_configs, "config", &dirs.config),
            (config.sync_saves, "saves", &dirs.saves),
            (config.sync_saves, "states", &dirs.states),
            (config.sync_thumbnails, "thumbnails", &dirs.thumbnails),
            (config.sync_system, "system", &dirs.system),
        ];

        let mut map = Self::new();
        for (enabled, name, dir) in wanted {
            if !enabled {
                continue;
            }
            let path = dir.clone().ok_or_else(|| SyncError::MissingDirectory {
                root: name.to_string(),
            })?;
            map = map.with_root(name, path);
        }
        Ok(map)
    }

    pub fn roots(&self) -> &[SyncRoot] {
        &self.roots
    }

    pub fn root(&self, name: &str) -> Option<&SyncRoot> {
        self.roots.iter().find(|r| r.name == name)
    }

    /// Resolve a manifest key to a local path.
    ///
    /// Returns `None` when the first component is not a mapped root, or when the
    /// key tries to escape its root (`..`, absolute or empty segments).
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        let (root_name, rest) = key.split_once('/')?;
        let root = self.root(root_name)?;

        let mut path = root.path.clone();
        for segment in rest.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(segment),
                _ => return None,
            }
        }
        Some(path)
    }
}

/// Keys that are never synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRules {
    main_config_file: String,
    playlist_extension: String,
}

impl IgnoreRules {
    pub fn new(main_config_file: impl Into<String>, playlist_extension: impl Into<String>) -> Self {
        Self {
            main_config_file: main_config_file.into(),
            playlist_extension: playlist_extension.into(),
        }
    }

    pub fn from_config(config: &CloudSyncConfig) -> Self {
        Self::new(&config.main_config_file, &config.playlist_extension)
    }

    /// True for the main config file, `config/content_*<ext>` playlists and
    /// `.DS_Store` droppings anywhere.
    pub fn is_ignored(&self, key: &str) -> bool {
        if let Some(path) = key.strip_prefix("config/") {
            if path == self.main_config_file {
                return true;
            }
            if path.starts_with("content_") && path.ends_with(&self.playlist_extension) {
                return true;
            }
        }

        key.ends_with("/.DS_Store")
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new("retroarch.cfg", ".lpl")
    }
}

/// A file found on disk, keyed by its manifest key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub key: String,
    pub path: PathBuf,
}

impl Keyed for LocalFile {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Walk every mapped root and return the non-ignored files, sorted by key.
///
/// Missing root directories contribute nothing. Unreadable entries and
/// non-UTF-8 names are skipped with a warning.
pub fn scan(map: &DirectoryMap, ignore: &IgnoreRules) -> Vec<LocalFile> {
    let mut files = Vec::new();

    for root in map.roots() {
        if !root.path.is_dir() {
            debug!(root = %root.name, "Root directory does not exist, skipping");
            continue;
        }

        for entry in WalkDir::new(&root.path).min_depth(1).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(key) = key_for(&root.name, &root.path, entry.path()) else {
                warn!(path = %entry.path().display(), "Skipping file with non-portable name");
                continue;
            };

            if ignore.is_ignored(&key) {
                debug!(key = %key, "Ignoring file");
                continue;
            }

            files.push(LocalFile {
                key,
                path: entry.into_path(),
            });
        }
    }

    files.sort_by(|a, b| key_cmp(&a.key, &b.key));
    debug!(files = files.len(), "Scanned current disk state");
    files
}

fn key_for(root_name: &str, root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut key = String::from(root_name);
    for component in relative.components() {
        key.push('/');
        key.push_str(component.as_os_str().to_str()?);
    }
    Some(key)
}
