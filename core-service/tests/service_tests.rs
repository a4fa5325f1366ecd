//! Service-level behavior: backend selection, enable switch, driver changes
//! and event emission.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_runtime::config::{CloudSyncConfig, CloudSyncConfigBuilder, GoogleDriveSettings};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SyncEvent};
use core_service::CloudSyncService;
use core_sync::{SyncStatus, LOCAL_MANIFEST_NAME};
use mockall::mock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

fn response(status: u16, body: &str) -> BridgeResult<HttpResponse> {
    Ok(HttpResponse {
        status,
        headers: HashMap::new(),
        body: Bytes::from(body.to_string()),
    })
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        for dir in ["config", "saves", "states", "assets"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        Self { _tmp: tmp, root }
    }

    fn builder(&self) -> CloudSyncConfigBuilder {
        CloudSyncConfig::builder()
            .enable(true)
            .config_dir(self.root.join("config"))
            .saves_dir(self.root.join("saves"))
            .states_dir(self.root.join("states"))
            .core_assets_dir(self.root.join("assets"))
            .poll_interval(Duration::from_millis(5))
    }

    fn write(&self, relative: &str, data: &[u8]) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn local_manifest(&self) -> PathBuf {
        self.root.join("assets").join(LOCAL_MANIFEST_NAME)
    }
}

fn service(config: CloudSyncConfig, http: MockHttpClient) -> CloudSyncService {
    CloudSyncService::new(
        config,
        Arc::new(http),
        Arc::new(SystemClock),
        Arc::new(EventBus::new(64)),
    )
    .unwrap()
}

fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap()
}

#[tokio::test]
async fn test_disabled_sync_is_noop() {
    let fx = Fixture::new();
    fx.write("saves/a.srm", b"save");
    let service = service(fx.builder().enable(false).build().unwrap(), MockHttpClient::new());
    let mut rx = service.event_bus().subscribe();

    assert!(service.sync_now().await.unwrap().is_none());
    assert!(drain(&mut rx).is_empty());
    assert!(!exists(&fx.local_manifest()));
}

#[tokio::test]
async fn test_null_driver_records_every_file() {
    let fx = Fixture::new();
    fx.write("saves/a.srm", b"save");
    fx.write("config/input.cfg", b"binds");
    let service = service(fx.builder().build().unwrap(), MockHttpClient::new());
    assert_eq!(service.driver_name().await, "null");

    let report = service.sync_now().await.unwrap().unwrap();
    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.stats.uploads, 2);
    assert!(!report.had_failures);
    assert!(exists(&fx.local_manifest()));
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_unknown_driver_falls_back_to_null() {
    let fx = Fixture::new();
    let service = service(fx.builder().driver("dropbox").build().unwrap(), MockHttpClient::new());
    assert_eq!(service.driver_name().await, "null");
    assert!(service.sync_now().await.unwrap().is_some());
}

#[tokio::test]
async fn test_switching_driver_forgets_local_manifest() {
    let fx = Fixture::new();
    fx.write("saves/a.srm", b"save");
    let service = service(fx.builder().build().unwrap(), MockHttpClient::new());
    service.sync_now().await.unwrap();
    assert!(exists(&fx.local_manifest()));

    // Same driver, other settings: the manifest stays.
    service
        .update_config(fx.builder().destructive(true).build().unwrap())
        .await
        .unwrap();
    assert!(exists(&fx.local_manifest()));

    service
        .update_config(
            fx.builder()
                .driver("webdav")
                .webdav("nas.local/dav", "", "")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(!exists(&fx.local_manifest()));
    assert_eq!(service.driver_name().await, "webdav");
    assert_eq!(service.config().await.driver, "webdav");
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let fx = Fixture::new();
    let service = service(fx.builder().build().unwrap(), MockHttpClient::new());

    let mut config = fx.builder().build().unwrap();
    config.driver = "webdav".into();
    assert!(service.update_config(config).await.is_err());
    assert_eq!(service.driver_name().await, "null");
}

#[tokio::test]
async fn test_webdav_session_uploads_and_reports() {
    let fx = Fixture::new();
    fx.write("saves/a.srm", b"save");

    let mut http = MockHttpClient::new();
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Get)
        .times(1)
        .returning(|req| {
            assert_eq!(req.url, "http://nas.local/dav/manifest.server");
            response(404, "")
        });
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Mkcol)
        .times(1)
        .returning(|req| {
            assert_eq!(req.url, "http://nas.local/dav/saves/");
            response(201, "")
        });
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Put && req.url.ends_with("/saves/a.srm"))
        .times(1)
        .returning(|req| {
            assert_eq!(req.body.as_deref(), Some(&b"save"[..]));
            response(201, "")
        });
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Put && req.url.ends_with("/manifest.server"))
        .times(1)
        .returning(|req| {
            let body = String::from_utf8(req.body.clone().unwrap().to_vec()).unwrap();
            assert!(body.contains("saves/a.srm"));
            response(201, "")
        });

    let config = fx
        .builder()
        .driver("webdav")
        .webdav("nas.local/dav", "", "")
        .build()
        .unwrap();
    let service = service(config, http);
    let mut rx = service.event_bus().subscribe();

    let report = service.sync_now().await.unwrap().unwrap();
    assert_eq!(report.stats.uploads, 1);
    assert!(report.need_manifest_upload);

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(CoreEvent::Sync(SyncEvent::Started { driver, .. })) if driver == "webdav"
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Completed { uploads: 1, .. }))));
}

#[tokio::test(start_paused = true)]
async fn test_google_drive_device_flow_emits_auth_events() {
    let fx = Fixture::new();

    let mut http = MockHttpClient::new();
    http.expect_execute()
        .withf(|req| req.url.ends_with("/device/code"))
        .times(1)
        .returning(|_| {
            response(
                200,
                r#"{"device_code":"dc","user_code":"ABCD-EFGH","verification_url":"https://www.google.com/device","expires_in":1800,"interval":5}"#,
            )
        });
    http.expect_execute()
        .withf(|req| req.url == TOKEN_URL)
        .times(1)
        .returning(|_| {
            response(
                200,
                r#"{"access_token":"at","refresh_token":"refresh-2","expires_in":3600}"#,
            )
        });
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Get && req.url.contains("mimeType%3D"))
        .times(1)
        .returning(|_| response(200, r#"{"files":[{"id":"folder-1","name":"RetroArch"}]}"#));
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Get && req.url.contains("in%20parents"))
        .returning(|_| response(200, r#"{"files":[]}"#));
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Post && req.url.ends_with("/drive/v3/files"))
        .returning(|_| response(200, r#"{"id":"file-1","name":"manifest.server"}"#));
    http.expect_execute()
        .withf(|req| req.method == HttpMethod::Patch)
        .returning(|_| response(200, r#"{"id":"file-1"}"#));

    let config = fx
        .builder()
        .driver("google_drive")
        .google_drive(GoogleDriveSettings {
            client_id: "client".into(),
            client_secret: None,
            refresh_token: None,
        })
        .build()
        .unwrap();
    let service = service(config, http);
    let mut rx = service.event_bus().subscribe();

    let report = service.sync_now().await.unwrap().unwrap();
    assert_eq!(report.status, SyncStatus::Completed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Auth(AuthEvent::DeviceCodeIssued { user_code, .. }) if user_code == "ABCD-EFGH"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }))));
    assert_eq!(
        service.google_drive_refresh_token().await.as_deref(),
        Some("refresh-2")
    );
}
