//! # Cloud Sync Configuration
//!
//! `CloudSyncConfig` gathers every setting the sync service reads: which
//! backend to use, which local roots participate, credentials, and the
//! scheduler knobs.
//!
//! ## Overview
//!
//! Configuration can be built in code with [`CloudSyncConfigBuilder`] or
//! deserialized from JSON with [`CloudSyncConfig::from_json`]. Both paths
//! finish with [`CloudSyncConfig::validate`], so an invalid configuration is
//! rejected before any sync session starts.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CloudSyncConfig;
//!
//! let config = CloudSyncConfig::builder()
//!     .enable(true)
//!     .driver("webdav")
//!     .webdav("https://dav.example.com/retroarch/", "user", "secret")
//!     .config_dir("/home/user/.config/retroarch/config")
//!     .saves_dir("/home/user/.config/retroarch/saves")
//!     .states_dir("/home/user/.config/retroarch/states")
//!     .core_assets_dir("/home/user/.config/retroarch/downloads")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default re-poll interval while a sync session waits on the network.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default number of concurrent transfers during the diff phase.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Local directories backing the logical sync roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDirectories {
    /// Backs the `config/` root
    pub config: Option<PathBuf>,
    /// Backs the `saves/` root
    pub saves: Option<PathBuf>,
    /// Backs the `states/` root
    pub states: Option<PathBuf>,
    /// Backs the `thumbnails/` root
    pub thumbnails: Option<PathBuf>,
    /// Backs the `system/` root
    pub system: Option<PathBuf>,
    /// Holds `manifest.local`, the cached `manifest.server` and `cloud_backups/`
    pub core_assets: Option<PathBuf>,
}

/// WebDAV credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavSettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for WebDavSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Google Drive OAuth client settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleDriveSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Persisted refresh token; absent until the device flow completes once
    pub refresh_token: Option<String>,
}

impl fmt::Debug for GoogleDriveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleDriveSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Cloud sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSyncConfig {
    /// Master switch; a disabled service never starts a session
    pub enable: bool,
    /// Backend name: `webdav`, `google_drive` or `null`
    pub driver: String,
    /// Hard deletes instead of backup-and-rename
    pub destructive: bool,
    /// Sync the `config/` root
    pub sync_configs: bool,
    /// Sync the `saves/` and `states/` roots
    pub sync_saves: bool,
    /// Sync the `thumbnails/` root
    pub sync_thumbnails: bool,
    /// Sync the `system/` root
    pub sync_system: bool,
    pub directories: SyncDirectories,
    pub webdav: WebDavSettings,
    pub google_drive: GoogleDriveSettings,
    /// Re-poll interval while the engine waits on the network
    pub poll_interval_ms: u64,
    /// Transfers allowed in flight during the diff phase
    pub max_in_flight: usize,
    /// Main configuration file under `config/`, never synced
    pub main_config_file: String,
    /// Playlist extension; `config/content_*<ext>` files are never synced
    pub playlist_extension: String,
}

impl Default for CloudSyncConfig {
    fn default() -> Self {
        Self {
            enable: false,
            driver: "null".to_string(),
            destructive: false,
            sync_configs: true,
            sync_saves: true,
            sync_thumbnails: false,
            sync_system: false,
            directories: SyncDirectories::default(),
            webdav: WebDavSettings::default(),
            google_drive: GoogleDriveSettings::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            main_config_file: "retroarch.cfg".to_string(),
            playlist_extension: ".lpl".to_string(),
        }
    }
}

impl CloudSyncConfig {
    /// Creates a new builder seeded with defaults.
    pub fn builder() -> CloudSyncConfigBuilder {
        CloudSyncConfigBuilder::default()
    }

    /// Deserializes and validates a JSON configuration document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CloudSyncConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid cloud sync configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Re-poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The core-assets directory is set
    /// - Every enabled root has a directory
    /// - The WebDAV URL is present when the WebDAV driver is selected
    /// - Scheduler knobs are within range
    pub fn validate(&self) -> Result<()> {
        let dirs = &self.directories;

        if dirs.core_assets.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
            return Err(missing_directory(
                "core_assets",
                "required to store manifests and backups",
            ));
        }

        let enabled_roots = [
            (self.sync_configs, "config", &dirs.config),
            (self.sync_saves, "saves", &dirs.saves),
            (self.sync_saves, "states", &dirs.states),
            (self.sync_thumbnails, "thumbnails", &dirs.thumbnails),
            (self.sync_system, "system", &dirs.system),
        ];
        for (enabled, root, dir) in enabled_roots {
            if enabled && dir.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                return Err(missing_directory(
                    root,
                    "enabled for sync but has no directory",
                ));
            }
        }

        if self.driver == "webdav" && self.webdav.url.trim().is_empty() {
            return Err(Error::Config(
                "WebDAV driver selected but no URL configured".to_string(),
            ));
        }

        if self.driver == "google_drive" && self.google_drive.client_id.trim().is_empty() {
            return Err(Error::Config(
                "Google Drive driver selected but no OAuth client id configured".to_string(),
            ));
        }

        if self.max_in_flight == 0 {
            return Err(Error::Config(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(Error::Config(format!(
                "poll_interval_ms must be between 1 and {}",
                MAX_POLL_INTERVAL_MS
            )));
        }

        Ok(())
    }
}

fn missing_directory(root: &str, message: &str) -> Error {
    Error::MissingDirectory {
        root: root.to_string(),
        message: message.to_string(),
    }
}

/// Builder for constructing [`CloudSyncConfig`] instances.
///
/// Call [`build()`](CloudSyncConfigBuilder::build) to validate and obtain the
/// final config.
#[derive(Debug, Default)]
pub struct CloudSyncConfigBuilder {
    config: CloudSyncConfig,
}

impl CloudSyncConfigBuilder {
    pub fn enable(mut self, enable: bool) -> Self {
        self.config.enable = enable;
        self
    }

    /// Sets the backend name (`webdav`, `google_drive`, `null`).
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.config.driver = driver.into();
        self
    }

    pub fn destructive(mut self, destructive: bool) -> Self {
        self.config.destructive = destructive;
        self
    }

    pub fn sync_configs(mut self, enabled: bool) -> Self {
        self.config.sync_configs = enabled;
        self
    }

    pub fn sync_saves(mut self, enabled: bool) -> Self {
        self.config.sync_saves = enabled;
        self
    }

    pub fn sync_thumbnails(mut self, enabled: bool) -> Self {
        self.config.sync_thumbnails = enabled;
        self
    }

    pub fn sync_system(mut self, enabled: bool) -> Self {
        self.config.sync_system = enabled;
        self
    }

    pub fn config_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.config = Some(path.into());
        self
    }

    pub fn saves_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.saves = Some(path.into());
        self
    }

    pub fn states_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.states = Some(path.into());
        self
    }

    pub fn thumbnails_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.thumbnails = Some(path.into());
        self
    }

    pub fn system_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.system = Some(path.into());
        self
    }

    pub fn core_assets_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.directories.core_assets = Some(path.into());
        self
    }

    pub fn webdav(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.webdav = WebDavSettings {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        };
        self
    }

    pub fn google_drive(mut self, settings: GoogleDriveSettings) -> Self {
        self.config.google_drive = settings;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    pub fn main_config_file(mut self, name: impl Into<String>) -> Self {
        self.config.main_config_file = name.into();
        self
    }

    pub fn playlist_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.playlist_extension = ext.into();
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<CloudSyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> CloudSyncConfigBuilder {
        CloudSyncConfig::builder()
            .config_dir("/tmp/ra/config")
            .saves_dir("/tmp/ra/saves")
            .states_dir("/tmp/ra/states")
            .core_assets_dir("/tmp/ra/assets")
    }

    #[test]
    fn test_defaults() {
        let config = CloudSyncConfig::default();
        assert!(!config.enable);
        assert_eq!(config.driver, "null");
        assert!(!config.destructive);
        assert!(config.sync_configs);
        assert!(config.sync_saves);
        assert!(!config.sync_thumbnails);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_in_flight, 5);
        assert_eq!(config.main_config_file, "retroarch.cfg");
        assert_eq!(config.playlist_extension, ".lpl");
    }

    #[test]
    fn test_builder_with_required_directories() {
        let config = base_builder().enable(true).build().unwrap();
        assert!(config.enable);
        assert_eq!(
            config.directories.saves,
            Some(PathBuf::from("/tmp/ra/saves"))
        );
    }

    #[test]
    fn test_builder_requires_core_assets() {
        let result = CloudSyncConfig::builder()
            .sync_configs(false)
            .sync_saves(false)
            .build();
        assert!(matches!(
            result,
            Err(Error::MissingDirectory { ref root, .. }) if root == "core_assets"
        ));
    }

    #[test]
    fn test_enabled_root_requires_directory() {
        let result = base_builder().sync_thumbnails(true).build();
        assert!(matches!(
            result,
            Err(Error::MissingDirectory { ref root, .. }) if root == "thumbnails"
        ));

        let config = base_builder()
            .sync_thumbnails(true)
            .thumbnails_dir("/tmp/ra/thumbnails")
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_disabled_root_needs_no_directory() {
        let config = CloudSyncConfig::builder()
            .sync_configs(false)
            .saves_dir("/tmp/ra/saves")
            .states_dir("/tmp/ra/states")
            .core_assets_dir("/tmp/ra/assets")
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_webdav_requires_url() {
        let result = base_builder().driver("webdav").build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = base_builder()
            .driver("webdav")
            .webdav("https://dav.example.com/", "user", "pw")
            .build()
            .unwrap();
        assert_eq!(config.webdav.url, "https://dav.example.com/");
    }

    #[test]
    fn test_validate_rejects_zero_in_flight() {
        let result = base_builder().max_in_flight(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_poll_interval_out_of_range() {
        assert!(base_builder()
            .poll_interval(Duration::from_millis(0))
            .build()
            .is_err());
        assert!(base_builder()
            .poll_interval(Duration::from_secs(60))
            .build()
            .is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let json = r#"{
            "enable": true,
            "driver": "webdav",
            "webdav": { "url": "https://dav.example.com/", "username": "u", "password": "p" },
            "directories": {
                "config": "/ra/config",
                "saves": "/ra/saves",
                "states": "/ra/states",
                "core_assets": "/ra/assets"
            }
        }"#;

        let config = CloudSyncConfig::from_json(json).unwrap();
        assert!(config.enable);
        assert_eq!(config.driver, "webdav");
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            CloudSyncConfig::from_json("{ not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = base_builder()
            .webdav("https://dav.example.com/", "user", "hunter2")
            .google_drive(GoogleDriveSettings {
                client_id: "id".to_string(),
                client_secret: Some("s3cret".to_string()),
                refresh_token: Some("1//refresh".to_string()),
            })
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("1//refresh"));
        assert!(debug.contains("[REDACTED]"));
    }
}
