//! Local side effects of a sync: backups, atomic writes, manifest files.

use crate::error::{Result, SyncError};
use crate::manifest::Manifest;
use bridge_traits::time::Clock;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Directory under the core-assets directory receiving displaced local files.
pub const BACKUP_DIR_NAME: &str = "cloud_backups";

/// Filesystem operations the engine performs, rooted at the core-assets directory.
#[derive(Clone)]
pub struct LocalStore {
    core_assets: PathBuf,
    destructive: bool,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub fn new(core_assets: impl Into<PathBuf>, destructive: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            core_assets: core_assets.into(),
            destructive,
            clock,
        }
    }

    pub fn core_assets(&self) -> &Path {
        &self.core_assets
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.core_assets.join(name)
    }

    /// `<core_assets>/cloud_backups/<key>-%y%m%d-%H%M%S`, in local time.
    pub fn backup_path(&self, key: &str) -> PathBuf {
        let stamp = self.clock.local_now().format("-%y%m%d-%H%M%S").to_string();
        let mut path = self.core_assets.join(BACKUP_DIR_NAME);
        for segment in key.split('/') {
            path.push(segment);
        }
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(stamp);
        path.set_file_name(name);
        path
    }

    /// Move `path` into the backup area. Returns the new location.
    pub fn backup(&self, key: &str, path: &Path) -> Result<PathBuf> {
        let target = self.backup_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        if let Err(e) = fs::rename(path, &target) {
            // rename cannot cross filesystems
            debug!(error = %e, "Rename failed, falling back to copy");
            fs::copy(path, &target).map_err(|e| SyncError::io(path, e))?;
            fs::remove_file(path).map_err(|e| SyncError::io(path, e))?;
        }

        info!(key, backup = %target.display(), "Backed up local file");
        Ok(target)
    }

    /// Write fetched content over `path`, backing up what was there unless
    /// destructive.
    pub fn store_fetched(&self, key: &str, path: &Path, data: &[u8]) -> Result<()> {
        if !self.destructive && path.is_file() {
            self.backup(key, path)?;
        }
        write_atomic(path, data)
    }

    /// Remove a local file that the server deleted. A file that is already
    /// gone is not an error.
    pub fn remove(&self, key: &str, path: &Path) -> Result<()> {
        if !path.exists() {
            debug!(key, "Local file already gone");
            return Ok(());
        }

        if self.destructive {
            match fs::remove_file(path) {
                Ok(()) => {
                    info!(key, "Deleted local file");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SyncError::io(path, e)),
            }
        } else {
            self.backup(key, path).map(|_| ())
        }
    }

    /// Read a manifest file. Absent, unreadable and malformed files all yield
    /// an empty manifest.
    pub fn read_manifest(&self, name: &str) -> Manifest {
        let path = self.manifest_path(name);
        match fs::read(&path) {
            Ok(bytes) => Manifest::decode_or_empty(&bytes, name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(manifest = name, "No manifest on disk");
                Manifest::new()
            }
            Err(e) => {
                warn!(manifest = name, error = %e, "Could not read manifest");
                Manifest::new()
            }
        }
    }

    pub fn write_manifest(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let bytes = manifest.encode()?;
        write_atomic(&self.manifest_path(name), &bytes)?;
        debug!(manifest = name, entries = manifest.len(), "Wrote manifest");
        Ok(())
    }

    pub fn delete_manifest(&self, name: &str) -> Result<()> {
        let path = self.manifest_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("core_assets", &self.core_assets)
            .field("destructive", &self.destructive)
            .finish()
    }
}

/// Write via a temporary file in the destination directory, then rename it
/// over `path`. Parent directories are created.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| SyncError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| SyncError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| SyncError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| SyncError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use bridge_traits::time::FixedClock;
    use chrono::{Local, TimeZone, Utc};

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()))
    }

    fn expected_stamp() -> String {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            .with_timezone(&Local)
            .format("-%y%m%d-%H%M%S")
            .to_string()
    }

    #[test]
    fn test_backup_path_layout() {
        let store = LocalStore::new("/ra/assets", false, fixed_clock());
        let path = store.backup_path("saves/snes/game.srm");
        assert_eq!(
            path,
            PathBuf::from(format!(
                "/ra/assets/cloud_backups/saves/snes/game.srm{}",
                expected_stamp()
            ))
        );
    }

    #[test]
    fn test_store_fetched_backs_up_existing() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        let target = dir.path().join("saves/game.srm");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"old").unwrap();

        let store = LocalStore::new(&assets, false, fixed_clock());
        store.store_fetched("saves/game.srm", &target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        let backup = store.backup_path("saves/game.srm");
        assert_eq!(fs::read(backup).unwrap(), b"old");
    }

    #[test]
    fn test_store_fetched_destructive_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("saves/game.srm");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"old").unwrap();

        let store = LocalStore::new(dir.path().join("assets"), true, fixed_clock());
        store.store_fetched("saves/game.srm", &target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join("assets").join(BACKUP_DIR_NAME).exists());
    }

    #[test]
    fn test_store_fetched_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("states/deep/nested/game.state");
        let store = LocalStore::new(dir.path(), false, fixed_clock());
        store.store_fetched("states/deep/nested/game.state", &target, b"s").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"s");
    }

    #[test]
    fn test_remove_backup_and_destructive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.srm");
        let b = dir.path().join("b.srm");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let keep = LocalStore::new(dir.path().join("assets"), false, fixed_clock());
        keep.remove("saves/a.srm", &a).unwrap();
        assert!(!a.exists());
        assert!(keep.backup_path("saves/a.srm").exists());

        let hard = LocalStore::new(dir.path().join("assets"), true, fixed_clock());
        hard.remove("saves/b.srm", &b).unwrap();
        assert!(!b.exists());
        assert!(!hard.backup_path("saves/b.srm").exists());

        hard.remove("saves/b.srm", &b).unwrap();
    }

    #[test]
    fn test_manifest_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), false, fixed_clock());
        assert!(store.read_manifest("manifest.local").is_empty());

        let manifest = Manifest::from_entries(vec![ManifestEntry::new("saves/a", "5d41402abc4b2a76b9719d911017c592")]);
        store.write_manifest("manifest.local", &manifest).unwrap();
        assert_eq!(store.read_manifest("manifest.local"), manifest);

        fs::write(store.manifest_path("manifest.local"), b"garbage").unwrap();
        assert!(store.read_manifest("manifest.local").is_empty());

        store.delete_manifest("manifest.local").unwrap();
        store.delete_manifest("manifest.local").unwrap();
        assert!(!store.manifest_path("manifest.local").exists());
    }
}
