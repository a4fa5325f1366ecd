//! Cloud sync service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP client, clock)
//! into the sync core and selects the storage backend named by the
//! configuration. Desktop apps typically enable the `desktop-shims` feature
//! (which depends on `bridge-desktop`) and call [`bootstrap_desktop`].
//!
//! ```ignore
//! let service = core_service::bootstrap_desktop(config)?;
//! let mut events = service.events();
//! if let Some(report) = service.sync_now().await? {
//!     println!("{}", report.title());
//! }
//! ```

pub mod error;
pub mod storage;

pub use error::{CoreError, Result};
pub use storage::{AnySession, AnyStorage};

use std::sync::Arc;

use bridge_traits::{http::HttpClient, storage::CloudStorage, time::Clock};
use core_auth::{DeviceCode, OAuthTokens};
use core_runtime::config::CloudSyncConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventStream};
use core_sync::{
    LocalStore, NullStorage, SingleFlight, SyncDriver, SyncError, SyncReport, SyncSettings,
    LOCAL_MANIFEST_NAME,
};
use provider_google_drive::GoogleDriveStorage;
use provider_webdav::WebDavStorage;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

struct ServiceState {
    config: CloudSyncConfig,
    storage: Arc<AnyStorage>,
}

/// Primary façade exposed to host applications.
///
/// Holds the active configuration and backend. At most one sync runs at a
/// time; [`sync_now`](Self::sync_now) while another run is in progress
/// returns `Ok(None)` after emitting `SyncEvent::AlreadyRunning`.
pub struct CloudSyncService {
    state: Mutex<ServiceState>,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    guard: SingleFlight,
}

impl CloudSyncService {
    /// Create a service from a validated configuration and bridge handles.
    pub fn new(
        config: CloudSyncConfig,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(build_storage(&config, &http_client, &clock, &event_bus));
        info!(driver = storage.name(), enabled = config.enable, "Cloud sync service ready");

        Ok(Self {
            state: Mutex::new(ServiceState { config, storage }),
            http_client,
            clock,
            event_bus,
            guard: SingleFlight::new(),
        })
    }

    /// Subscribe to auth and sync events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub async fn config(&self) -> CloudSyncConfig {
        self.state.lock().await.config.clone()
    }

    /// Name of the backend the next sync will use.
    pub async fn driver_name(&self) -> &'static str {
        self.state.lock().await.storage.name()
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_busy()
    }

    /// Refresh token obtained by the Google Drive backend, for the host to
    /// persist into its configuration.
    pub async fn google_drive_refresh_token(&self) -> Option<String> {
        let storage = Arc::clone(&self.state.lock().await.storage);
        match &*storage {
            AnyStorage::GoogleDrive(drive) => drive.refresh_token().await,
            _ => None,
        }
    }

    /// Replace the configuration.
    ///
    /// Rebuilds the backend when its settings change. Changing the driver
    /// name also deletes `manifest.local`, so the next sync against the new
    /// backend reconciles every file.
    pub async fn update_config(&self, config: CloudSyncConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.state.lock().await;

        if state.config.driver != config.driver {
            self.switch_driver(&state.config.driver, &config)?;
        }

        if backend_changed(&state.config, &config) {
            state.storage = Arc::new(build_storage(
                &config,
                &self.http_client,
                &self.clock,
                &self.event_bus,
            ));
        }
        state.config = config;
        Ok(())
    }

    fn switch_driver(&self, previous: &str, config: &CloudSyncConfig) -> Result<()> {
        info!(from = previous, to = %config.driver, "Cloud sync driver changed, forgetting local manifest");
        if let Some(core_assets) = &config.directories.core_assets {
            LocalStore::new(core_assets, config.destructive, Arc::clone(&self.clock))
                .delete_manifest(LOCAL_MANIFEST_NAME)?;
        }
        Ok(())
    }

    /// Run one sync session with the current configuration.
    ///
    /// Returns `Ok(None)` when sync is disabled or a session is already in
    /// progress. Per-file failures and conflicts are part of the report.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        let (config, storage) = {
            let state = self.state.lock().await;
            (state.config.clone(), Arc::clone(&state.storage))
        };

        if !config.enable {
            debug!("Cloud sync disabled");
            return Ok(None);
        }

        let settings = SyncSettings::from_config(&config, Arc::clone(&self.clock))?;
        let driver = SyncDriver::new(storage, Arc::clone(&self.event_bus))
            .with_guard(self.guard.clone())
            .with_poll_interval(config.poll_interval());

        match driver.run(settings).await {
            Ok(report) => {
                info!(title = %report.title(), "Cloud sync done");
                Ok(Some(report))
            }
            Err(SyncError::AlreadyRunning) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for CloudSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSyncService")
            .field("running", &self.is_running())
            .finish()
    }
}

fn backend_changed(old: &CloudSyncConfig, new: &CloudSyncConfig) -> bool {
    old.driver != new.driver
        || old.destructive != new.destructive
        || old.webdav != new.webdav
        || old.google_drive != new.google_drive
}

/// Resolve the configured driver name. Unknown names fall back to the null
/// backend.
fn build_storage(
    config: &CloudSyncConfig,
    http_client: &Arc<dyn HttpClient>,
    clock: &Arc<dyn Clock>,
    event_bus: &Arc<EventBus>,
) -> AnyStorage {
    match config.driver.as_str() {
        storage::WEBDAV => AnyStorage::WebDav(WebDavStorage::new(
            Arc::clone(http_client),
            &config.webdav,
            config.destructive,
            Arc::clone(clock),
        )),
        storage::GOOGLE_DRIVE => {
            let codes = Arc::clone(event_bus);
            let tokens = Arc::clone(event_bus);
            AnyStorage::GoogleDrive(
                GoogleDriveStorage::new(
                    Arc::clone(http_client),
                    &config.google_drive,
                    config.destructive,
                    Arc::clone(clock),
                )
                .on_device_code(Arc::new(move |code: &DeviceCode| {
                    info!(url = %code.verification_url, user_code = %code.user_code, "Authorize this device");
                    codes.emit(CoreEvent::Auth(AuthEvent::DeviceCodeIssued {
                        driver: storage::GOOGLE_DRIVE.to_string(),
                        verification_url: code.verification_url.clone(),
                        user_code: code.user_code.clone(),
                    }));
                }))
                .on_tokens(Arc::new(move |issued: &OAuthTokens| {
                    tokens.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
                        driver: storage::GOOGLE_DRIVE.to_string(),
                        expires_at: issued.expires_at.timestamp(),
                    }));
                })),
            )
        }
        storage::NULL => AnyStorage::Null(NullStorage),
        other => {
            warn!(driver = other, "Unknown cloud sync driver, using null backend");
            AnyStorage::Null(NullStorage)
        }
    }
}

/// Build a service with the desktop HTTP client and the system clock.
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(config: CloudSyncConfig) -> Result<CloudSyncService> {
    let http = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    CloudSyncService::new(
        config,
        Arc::new(http),
        Arc::new(bridge_traits::time::SystemClock),
        Arc::new(EventBus::default()),
    )
}
