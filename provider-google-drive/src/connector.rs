//! Google Drive API connector implementation
//!
//! Implements `CloudStorage` for Google Drive API v3. Every synced file lives
//! directly in one app folder, named by its manifest key.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::CloudStorage;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_auth::{DeviceCode, OAuthConfig, OAuthFlowManager, OAuthTokens};
use core_runtime::config::GoogleDriveSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{GoogleDriveError, Result};
use crate::types::{CreateFileRequest, DriveFile, FilesListResponse, RenameRequest, FOLDER_MIME_TYPE};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Drive media upload base URL
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Folder holding every synced file
pub const APP_FOLDER_NAME: &str = "RetroArch";

/// Attempts for a request answered with 429 or 5xx
const MAX_RETRIES: u32 = 3;

/// Renewal margin before the access token's expiry
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// Called with the code the user must enter during device authorization.
pub type DeviceCodeCallback = Arc<dyn Fn(&DeviceCode) + Send + Sync>;

/// Called whenever a fresh token pair has been obtained.
pub type TokenCallback = Arc<dyn Fn(&OAuthTokens) + Send + Sync>;

/// Per-run state: the access token and the app folder id.
#[derive(Default)]
pub struct GoogleDriveSession {
    tokens: RwLock<Option<OAuthTokens>>,
    folder_id: RwLock<Option<String>>,
}

impl GoogleDriveSession {
    async fn access_token(&self) -> Result<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(GoogleDriveError::NotAuthenticated)
    }

    async fn folder_id(&self) -> Result<String> {
        self.folder_id
            .read()
            .await
            .clone()
            .ok_or(GoogleDriveError::NotAuthenticated)
    }
}

/// Google Drive storage backend
///
/// # Authentication
///
/// `begin` exchanges the stored refresh token for an access token. Without a
/// refresh token it runs the OAuth device flow: the verification URL and user
/// code go to the [`DeviceCodeCallback`], and `begin` completes once the user
/// approves. New refresh tokens are reported through the [`TokenCallback`] so
/// the host can persist them.
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::GoogleDriveStorage;
///
/// let storage = GoogleDriveStorage::new(http_client, &config.google_drive, false, clock)
///     .on_device_code(Arc::new(|code| println!("Visit {} and enter {}", code.verification_url, code.user_code)));
/// ```
pub struct GoogleDriveStorage {
    http_client: Arc<dyn HttpClient>,
    oauth: OAuthFlowManager,
    refresh_token: Mutex<Option<String>>,
    destructive: bool,
    clock: Arc<dyn Clock>,
    on_device_code: Option<DeviceCodeCallback>,
    on_tokens: Option<TokenCallback>,
}

impl GoogleDriveStorage {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        settings: &GoogleDriveSettings,
        destructive: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = OAuthConfig::google_drive(&settings.client_id, settings.client_secret.clone());
        Self {
            oauth: OAuthFlowManager::new(config, Arc::clone(&http_client)),
            http_client,
            refresh_token: Mutex::new(settings.refresh_token.clone()),
            destructive,
            clock,
            on_device_code: None,
            on_tokens: None,
        }
    }

    pub fn on_device_code(mut self, callback: DeviceCodeCallback) -> Self {
        self.on_device_code = Some(callback);
        self
    }

    pub fn on_tokens(mut self, callback: TokenCallback) -> Self {
        self.on_tokens = Some(callback);
        self
    }

    /// The refresh token currently in use, if any.
    pub async fn refresh_token(&self) -> Option<String> {
        self.refresh_token.lock().await.clone()
    }

    async fn store_tokens(&self, session: &GoogleDriveSession, tokens: OAuthTokens) {
        *self.refresh_token.lock().await = Some(tokens.refresh_token.clone());
        if let Some(callback) = &self.on_tokens {
            callback(&tokens);
        }
        *session.tokens.write().await = Some(tokens);
    }

    /// Make sure the session holds a usable access token.
    async fn authenticate(&self, session: &GoogleDriveSession) -> Result<()> {
        if let Some(tokens) = session.tokens.read().await.as_ref() {
            if !tokens.is_expired_with_buffer(TOKEN_EXPIRY_BUFFER_SECS) {
                return Ok(());
            }
        }

        let refresh_token = self.refresh_token.lock().await.clone();
        let tokens = match refresh_token {
            Some(refresh_token) => self.oauth.refresh_access_token(&refresh_token).await?,
            None => {
                info!("No refresh token, starting device authorization");
                let code = self.oauth.request_device_code().await?;
                if let Some(callback) = &self.on_device_code {
                    callback(&code);
                }
                self.oauth.poll_device_token(&code).await?
            }
        };

        self.store_tokens(session, tokens).await;
        Ok(())
    }

    /// Send an authorized request, retrying rate limits and server errors.
    #[instrument(skip(self, session, request), fields(method = request.method.as_str(), url = %request.url))]
    async fn send(&self, session: &GoogleDriveSession, request: HttpRequest) -> Result<HttpResponse> {
        let token = session.access_token().await?;
        let request = request
            .bearer_token(token)
            .timeout(Duration::from_secs(60));
        let mut attempt = 0;

        loop {
            let response = self.http_client.execute(request.clone()).await?;
            let status = response.status;

            if status == 401 {
                warn!("Access token rejected");
                return Err(GoogleDriveError::Unauthorized(error_text(&response)));
            }

            if status == 429 || response.is_server_error() {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    warn!(status, attempts = attempt, "API request failed");
                    return Err(GoogleDriveError::ApiError {
                        status_code: status,
                        message: format!("Request failed after {} retries", MAX_RETRIES),
                    });
                }

                let backoff_ms = 100u64 * 2u64.pow(attempt);
                warn!(status, attempt, backoff_ms, "API request failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                continue;
            }

            debug!(status, "API request done");
            return Ok(response);
        }
    }

    fn expect_success(response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(GoogleDriveError::ApiError {
                status_code: response.status,
                message: error_text(&response),
            })
        }
    }

    async fn list(&self, session: &GoogleDriveSession, query: &str) -> Result<Vec<DriveFile>> {
        let url = format!(
            "{}/files?q={}&spaces=drive&fields=files(id,name,mimeType)",
            DRIVE_API_BASE,
            urlencoding::encode(query)
        );
        let response =
            Self::expect_success(self.send(session, HttpRequest::new(HttpMethod::Get, url)).await?)?;

        let list: FilesListResponse = serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse files list response: {}", e))
        })?;
        Ok(list.files)
    }

    async fn create(
        &self,
        session: &GoogleDriveSession,
        metadata: &CreateFileRequest<'_>,
    ) -> Result<DriveFile> {
        let request = HttpRequest::new(HttpMethod::Post, format!("{}/files", DRIVE_API_BASE))
            .json(metadata)?;
        let response = Self::expect_success(self.send(session, request).await?)?;

        serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse created file: {}", e))
        })
    }

    /// Find or create the app folder.
    async fn ensure_folder(&self, session: &GoogleDriveSession) -> Result<()> {
        if session.folder_id.read().await.is_some() {
            return Ok(());
        }

        let query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            APP_FOLDER_NAME, FOLDER_MIME_TYPE
        );
        let folder = match self.list(session, &query).await?.into_iter().next() {
            Some(folder) => folder,
            None => {
                info!(folder = APP_FOLDER_NAME, "Creating app folder");
                self.create(
                    session,
                    &CreateFileRequest {
                        name: APP_FOLDER_NAME,
                        mime_type: Some(FOLDER_MIME_TYPE),
                        parents: vec![],
                    },
                )
                .await?
            }
        };

        debug!(folder_id = %folder.id, "Using app folder");
        *session.folder_id.write().await = Some(folder.id);
        Ok(())
    }

    async fn lookup(&self, session: &GoogleDriveSession, key: &str) -> Result<Option<DriveFile>> {
        let folder_id = session.folder_id().await?;
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(key),
            folder_id
        );
        Ok(self.list(session, &query).await?.into_iter().next())
    }

    async fn read_file(&self, session: &GoogleDriveSession, key: &str) -> Result<Option<Bytes>> {
        let Some(file) = self.lookup(session, key).await? else {
            debug!(key, "Not on Google Drive");
            return Ok(None);
        };

        let url = format!("{}/files/{}?alt=media", DRIVE_API_BASE, file.id);
        let response = self.send(session, HttpRequest::new(HttpMethod::Get, url)).await?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = Self::expect_success(response)?;

        info!(key, bytes = response.body.len(), "Downloaded");
        Ok(Some(response.body))
    }

    async fn update_file(&self, session: &GoogleDriveSession, key: &str, data: Bytes) -> Result<()> {
        let file = match self.lookup(session, key).await? {
            Some(file) => file,
            None => {
                let folder_id = session.folder_id().await?;
                self.create(
                    session,
                    &CreateFileRequest {
                        name: key,
                        mime_type: None,
                        parents: vec![folder_id.as_str()],
                    },
                )
                .await?
            }
        };

        let size = data.len();
        let url = format!("{}/files/{}?uploadType=media", DRIVE_UPLOAD_BASE, file.id);
        let request = HttpRequest::new(HttpMethod::Patch, url)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        Self::expect_success(self.send(session, request).await?)?;

        info!(key, bytes = size, "Uploaded");
        Ok(())
    }

    async fn delete_file(&self, session: &GoogleDriveSession, key: &str) -> Result<()> {
        let Some(file) = self.lookup(session, key).await? else {
            debug!(key, "Already absent on Google Drive");
            return Ok(());
        };
        let url = format!("{}/files/{}", DRIVE_API_BASE, file.id);

        if self.destructive {
            let response = self.send(session, HttpRequest::new(HttpMethod::Delete, url)).await?;
            if response.status != 404 {
                Self::expect_success(response)?;
            }
            info!(key, "Deleted");
        } else {
            let archived = format!(
                "{}{}",
                key,
                self.clock.local_now().format("-%y%m%d-%H%M%S")
            );
            let request =
                HttpRequest::new(HttpMethod::Patch, url).json(&RenameRequest { name: &archived })?;
            Self::expect_success(self.send(session, request).await?)?;
            info!(key, archived = %archived, "Archived");
        }
        Ok(())
    }
}

#[async_trait]
impl CloudStorage for GoogleDriveStorage {
    type Session = GoogleDriveSession;

    fn name(&self) -> &'static str {
        "google_drive"
    }

    fn open_session(&self) -> Self::Session {
        GoogleDriveSession::default()
    }

    #[instrument(skip(self, session))]
    async fn begin(&self, session: &Self::Session) -> BridgeResult<()> {
        self.authenticate(session).await?;
        self.ensure_folder(session).await?;
        Ok(())
    }

    async fn end(&self, session: &Self::Session) -> BridgeResult<()> {
        *session.folder_id.write().await = None;
        *session.tokens.write().await = None;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn read(&self, session: &Self::Session, key: &str) -> BridgeResult<Option<Bytes>> {
        Ok(self.read_file(session, key).await?)
    }

    #[instrument(skip(self, session, data), fields(bytes = data.len()))]
    async fn update(&self, session: &Self::Session, key: &str, data: Bytes) -> BridgeResult<()> {
        Ok(self.update_file(session, key, data).await?)
    }

    #[instrument(skip(self, session))]
    async fn delete(&self, session: &Self::Session, key: &str) -> BridgeResult<()> {
        Ok(self.delete_file(session, key).await?)
    }

    #[instrument(skip(self, session))]
    async fn refresh_auth(&self, session: &Self::Session) -> BridgeResult<()> {
        let Some(refresh_token) = self.refresh_token.lock().await.clone() else {
            return Err(GoogleDriveError::NotAuthenticated.into());
        };
        let tokens = self
            .oauth
            .refresh_access_token(&refresh_token)
            .await
            .map_err(GoogleDriveError::from)?;
        self.store_tokens(session, tokens).await;
        Ok(())
    }
}

/// Quote a value for a Drive `q` string literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn error_text(response: &HttpResponse) -> String {
    String::from_utf8_lossy(&response.body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use chrono::{Local, TimeZone, Utc};
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

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

    fn instant() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap()
    }

    fn settings(refresh_token: Option<&str>) -> GoogleDriveSettings {
        GoogleDriveSettings {
            client_id: "client".into(),
            client_secret: None,
            refresh_token: refresh_token.map(String::from),
        }
    }

    fn storage(mock: MockHttpClient, destructive: bool) -> GoogleDriveStorage {
        GoogleDriveStorage::new(
            Arc::new(mock),
            &settings(Some("refresh-1")),
            destructive,
            Arc::new(FixedClock(instant())),
        )
    }

    /// Expect the token refresh and the folder lookup `begin` performs.
    fn expect_begin(mock: &mut MockHttpClient) {
        mock.expect_execute()
            .withf(|req| req.url == TOKEN_URL)
            .times(1)
            .returning(|_| response(200, r#"{"access_token":"at-1","expires_in":3600}"#));
        mock.expect_execute()
            .withf(|req| req.url.contains("mimeType%3D%27application%2Fvnd.google-apps.folder%27"))
            .times(1)
            .returning(|_| response(200, r#"{"files":[{"id":"folder-1","name":"RetroArch"}]}"#));
    }

    async fn begun(storage: &GoogleDriveStorage) -> GoogleDriveSession {
        let session = storage.open_session();
        storage.begin(&session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_begin_refreshes_and_finds_folder() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        let storage = storage(mock, false);

        let session = begun(&storage).await;
        assert_eq!(session.access_token().await.unwrap(), "at-1");
        assert_eq!(session.folder_id().await.unwrap(), "folder-1");
        assert_eq!(storage.refresh_token().await.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_begin_creates_missing_folder() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| req.url == TOKEN_URL)
            .returning(|_| response(200, r#"{"access_token":"at-1","expires_in":3600}"#));
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Get)
            .times(1)
            .returning(|_| response(200, r#"{"files":[]}"#));
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Post && req.url.ends_with("/files"))
            .times(1)
            .returning(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
                assert_eq!(body["name"], "RetroArch");
                assert_eq!(body["mimeType"], FOLDER_MIME_TYPE);
                response(200, r#"{"id":"new-folder","name":"RetroArch"}"#)
            });

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        assert_eq!(session.folder_id().await.unwrap(), "new-folder");
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_is_unauthorized() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| req.url == TOKEN_URL)
            .times(1)
            .returning(|_| response(400, r#"{"error":"invalid_grant"}"#));

        let storage = storage(mock, false);
        let session = storage.open_session();
        let err = storage.begin(&session).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_without_refresh_token_runs_device_flow() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| req.url.ends_with("/device/code"))
            .times(1)
            .returning(|_| {
                response(
                    200,
                    r#"{"device_code":"dc","user_code":"ABCD-EFGH","verification_url":"https://www.google.com/device","expires_in":1800,"interval":5}"#,
                )
            });
        mock.expect_execute()
            .withf(|req| req.url == TOKEN_URL)
            .times(1)
            .returning(|_| {
                response(
                    200,
                    r#"{"access_token":"at-2","refresh_token":"refresh-2","expires_in":3600}"#,
                )
            });
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Get)
            .returning(|_| response(200, r#"{"files":[{"id":"folder-1","name":"RetroArch"}]}"#));

        let issued = Arc::new(StdMutex::new(None));
        let saved = Arc::new(StdMutex::new(None));
        let issued_clone = Arc::clone(&issued);
        let saved_clone = Arc::clone(&saved);

        let storage = GoogleDriveStorage::new(
            Arc::new(mock),
            &settings(None),
            false,
            Arc::new(FixedClock(instant())),
        )
        .on_device_code(Arc::new(move |code: &DeviceCode| {
            *issued_clone.lock().unwrap() = Some(code.user_code.clone());
        }))
        .on_tokens(Arc::new(move |tokens: &OAuthTokens| {
            *saved_clone.lock().unwrap() = Some(tokens.refresh_token.clone());
        }));

        let session = begun(&storage).await;
        assert_eq!(session.access_token().await.unwrap(), "at-2");
        assert_eq!(issued.lock().unwrap().as_deref(), Some("ABCD-EFGH"));
        assert_eq!(saved.lock().unwrap().as_deref(), Some("refresh-2"));
        assert_eq!(storage.refresh_token().await.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_none() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("in%20parents"))
            .times(1)
            .returning(|req| {
                assert!(req.url.contains("name%3D%27manifest.server%27"));
                assert!(req.url.contains("folder-1"));
                response(200, r#"{"files":[]}"#)
            });

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        assert!(storage.read(&session, "manifest.server").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_downloads_media() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("in%20parents"))
            .returning(|_| response(200, r#"{"files":[{"id":"file-9","name":"saves/a.srm"}]}"#));
        mock.expect_execute()
            .withf(|req| req.url.ends_with("/files/file-9?alt=media"))
            .times(1)
            .returning(|req| {
                assert_eq!(
                    req.headers.get("Authorization").map(String::as_str),
                    Some("Bearer at-1")
                );
                response(200, "save-data")
            });

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        let data = storage.read(&session, "saves/a.srm").await.unwrap().unwrap();
        assert_eq!(&data[..], b"save-data");
    }

    #[tokio::test]
    async fn test_update_creates_metadata_then_uploads() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("in%20parents"))
            .returning(|_| response(200, r#"{"files":[]}"#));
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Post && req.url.ends_with("/files"))
            .times(1)
            .returning(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
                assert_eq!(body["name"], "saves/a.srm");
                assert_eq!(body["parents"][0], "folder-1");
                response(200, r#"{"id":"file-new","name":"saves/a.srm"}"#)
            });
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Patch)
            .times(1)
            .returning(|req| {
                assert_eq!(
                    req.url,
                    "https://www.googleapis.com/upload/drive/v3/files/file-new?uploadType=media"
                );
                assert_eq!(req.body.as_deref(), Some(&b"payload"[..]));
                response(200, r#"{"id":"file-new"}"#)
            });

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        storage
            .update(&session, "saves/a.srm", Bytes::from_static(b"payload"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_archives_when_not_destructive() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("in%20parents"))
            .returning(|_| response(200, r#"{"files":[{"id":"file-9","name":"saves/a.srm"}]}"#));
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Patch)
            .times(1)
            .returning(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
                let expected = format!(
                    "saves/a.srm{}",
                    instant().with_timezone(&Local).format("-%y%m%d-%H%M%S")
                );
                assert_eq!(body["name"], expected);
                response(200, r#"{"id":"file-9"}"#)
            });

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        storage.delete(&session, "saves/a.srm").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_destructive_and_missing() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("name%3D%27saves%2Fa.srm%27"))
            .returning(|_| response(200, r#"{"files":[{"id":"file-9","name":"saves/a.srm"}]}"#));
        mock.expect_execute()
            .withf(|req| req.url.contains("name%3D%27saves%2Fgone.srm%27"))
            .returning(|_| response(200, r#"{"files":[]}"#));
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Delete)
            .times(1)
            .returning(|req| {
                assert!(req.url.ends_with("/files/file-9"));
                response(204, "")
            });

        let storage = storage(mock, true);
        let session = begun(&storage).await;
        storage.delete(&session, "saves/a.srm").await.unwrap();
        storage.delete(&session, "saves/gone.srm").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_access_token_is_unauthorized() {
        let mut mock = MockHttpClient::new();
        expect_begin(&mut mock);
        mock.expect_execute()
            .withf(|req| req.url.contains("in%20parents"))
            .times(1)
            .returning(|_| response(401, "invalid credentials"));

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        let err = storage.read(&session, "saves/a.srm").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_refresh_auth_replaces_access_token() {
        let mut mock = MockHttpClient::new();
        let mut calls = 0;
        mock.expect_execute()
            .withf(|req| req.url == TOKEN_URL)
            .times(2)
            .returning(move |_| {
                calls += 1;
                response(
                    200,
                    &format!(r#"{{"access_token":"at-{}","expires_in":3600}}"#, calls),
                )
            });
        mock.expect_execute()
            .withf(|req| req.method == HttpMethod::Get)
            .returning(|_| response(200, r#"{"files":[{"id":"folder-1","name":"RetroArch"}]}"#));

        let storage = storage(mock, false);
        let session = begun(&storage).await;
        storage.refresh_auth(&session).await.unwrap();
        assert_eq!(session.access_token().await.unwrap(), "at-2");
    }

    #[tokio::test]
    async fn test_requests_need_begin() {
        let storage = storage(MockHttpClient::new(), false);
        let session = storage.open_session();
        let err = storage.read(&session, "saves/a.srm").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("saves/it's.srm"), "saves/it\\'s.srm");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }
}
