//! WebDAV connector implementation
//!
//! Implements `CloudStorage` on top of plain WebDAV verbs. Manifest keys map
//! to paths below the configured base URL; parent collections are created on
//! demand with `MKCOL`.

use async_trait::async_trait;
use base64::Engine;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::CloudStorage;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::config::WebDavSettings;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::digest::{DigestAuth, DigestChallenge};
use crate::error::{Result, WebDavError};

/// Collection receiving archived files when deletes are not destructive
pub const DELETED_DIR: &str = "deleted";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-run state: the negotiated digest context and the collections already
/// known to exist.
#[derive(Default)]
pub struct WebDavSession {
    digest: RwLock<Option<Arc<DigestAuth>>>,
    collections: Mutex<HashSet<String>>,
}

impl WebDavSession {
    /// Whether the server asked for Digest authentication during `begin`.
    pub async fn uses_digest(&self) -> bool {
        self.digest.read().await.is_some()
    }
}

/// WebDAV storage backend
///
/// Authenticates with HTTP Basic until the server answers the `begin` probe
/// with a Digest challenge, after which every request of the run carries a
/// Digest `Authorization` header. Without a username no credentials are sent
/// and `begin` does not probe at all.
pub struct WebDavStorage {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    username: String,
    password: String,
    destructive: bool,
    clock: Arc<dyn Clock>,
}

impl WebDavStorage {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        settings: &WebDavSettings,
        destructive: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            base_url: normalize_base_url(&settings.url),
            username: settings.username.clone(),
            password: settings.password.clone(),
            destructive,
            clock,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    fn url_for(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}{}", self.base_url, encoded.join("/"))
    }

    async fn authorize(&self, session: &WebDavSession, request: HttpRequest) -> HttpRequest {
        if !self.has_credentials() {
            return request;
        }

        let value = match session.digest.read().await.as_ref() {
            Some(digest) => digest.authorization(
                request.method.as_str(),
                request_path(&request.url),
                &self.username,
                &self.password,
            ),
            None => {
                let pair = format!("{}:{}", self.username, self.password);
                format!(
                    "Basic {}",
                    base64::engine::general_purpose::STANDARD.encode(pair)
                )
            }
        };
        request.header("Authorization", value)
    }

    #[instrument(skip(self, session, request), fields(method = request.method.as_str(), url = %request.url))]
    async fn send(&self, session: &WebDavSession, request: HttpRequest) -> Result<HttpResponse> {
        let request = self
            .authorize(session, request.timeout(REQUEST_TIMEOUT))
            .await;
        let response = self.http_client.execute(request).await?;
        debug!(status = response.status, "WebDAV request done");
        Ok(response)
    }

    /// `OPTIONS` against the base URL. Switches the session to Digest when
    /// the server challenges for it.
    async fn probe(&self, session: &WebDavSession) -> Result<()> {
        if !self.has_credentials() {
            debug!("No credentials configured, skipping probe");
            return Ok(());
        }

        let request = || HttpRequest::new(HttpMethod::Options, self.base_url.clone());
        let mut response = self.send(session, request()).await?;

        if response.status == 401 {
            let challenge = response
                .header("WWW-Authenticate")
                .and_then(DigestChallenge::parse);
            if let Some(challenge) = challenge {
                info!(realm = %challenge.realm, algorithm = challenge.algorithm.as_str(), "Switching to digest authentication");
                *session.digest.write().await = Some(Arc::new(DigestAuth::new(challenge)));
                response = self.send(session, request()).await?;
            }
        }

        expect_success("OPTIONS", response)?;
        Ok(())
    }

    /// `MKCOL` every parent collection of `key` not yet seen this run.
    async fn ensure_parents(&self, session: &WebDavSession, key: &str) -> Result<()> {
        let segments: Vec<&str> = key.split('/').collect();
        let mut path = String::new();

        for segment in &segments[..segments.len().saturating_sub(1)] {
            path.push_str(segment);
            path.push('/');

            if session.collections.lock().await.contains(&path) {
                continue;
            }

            let url = self.url_for(&path);
            let response = self.send(session, HttpRequest::new(HttpMethod::Mkcol, url)).await?;
            // 405: the collection already exists
            if response.status != 405 {
                expect_success("MKCOL", response)?;
                debug!(collection = %path, "Created collection");
            }
            session.collections.lock().await.insert(path.clone());
        }
        Ok(())
    }

    async fn read_file(&self, session: &WebDavSession, key: &str) -> Result<Option<Bytes>> {
        let response = self
            .send(session, HttpRequest::new(HttpMethod::Get, self.url_for(key)))
            .await?;
        if response.status == 404 {
            debug!(key, "Not on server");
            return Ok(None);
        }
        let response = expect_success("GET", response)?;

        info!(key, bytes = response.body.len(), "Downloaded");
        Ok(Some(response.body))
    }

    async fn update_file(&self, session: &WebDavSession, key: &str, data: Bytes) -> Result<()> {
        self.ensure_parents(session, key).await?;

        let size = data.len();
        let request = HttpRequest::new(HttpMethod::Put, self.url_for(key))
            .header("Content-Type", "application/octet-stream")
            .body(data);
        expect_success("PUT", self.send(session, request).await?)?;

        info!(key, bytes = size, "Uploaded");
        Ok(())
    }

    async fn delete_file(&self, session: &WebDavSession, key: &str) -> Result<()> {
        if self.destructive {
            let response = self
                .send(session, HttpRequest::new(HttpMethod::Delete, self.url_for(key)))
                .await?;
            if response.status != 404 {
                expect_success("DELETE", response)?;
            }
            info!(key, "Deleted");
            return Ok(());
        }

        let archived = format!(
            "{}/{}{}",
            DELETED_DIR,
            key,
            self.clock.local_now().format("-%y%m%d-%H%M%S")
        );
        self.ensure_parents(session, &archived).await?;

        let request = HttpRequest::new(HttpMethod::Move, self.url_for(key))
            .header("Destination", self.url_for(&archived))
            .header("Overwrite", "T");
        let response = self.send(session, request).await?;
        if response.status == 404 {
            warn!(key, "Nothing to archive");
            return Ok(());
        }
        expect_success("MOVE", response)?;

        info!(key, archived = %archived, "Archived");
        Ok(())
    }
}

#[async_trait]
impl CloudStorage for WebDavStorage {
    type Session = WebDavSession;

    fn name(&self) -> &'static str {
        "webdav"
    }

    fn open_session(&self) -> Self::Session {
        WebDavSession::default()
    }

    #[instrument(skip(self, session), fields(url = %self.base_url))]
    async fn begin(&self, session: &Self::Session) -> BridgeResult<()> {
        Ok(self.probe(session).await?)
    }

    async fn end(&self, session: &Self::Session) -> BridgeResult<()> {
        *session.digest.write().await = None;
        session.collections.lock().await.clear();
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

    /// Drops the digest context and probes again for a fresh nonce.
    #[instrument(skip(self, session))]
    async fn refresh_auth(&self, session: &Self::Session) -> BridgeResult<()> {
        *session.digest.write().await = None;
        Ok(self.probe(session).await?)
    }
}

/// Prefix `http://` when no scheme is given and end with a slash.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    let mut normalized = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Path component of an absolute URL, as used in the digest `uri` field.
fn request_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find('/').map_or("/", |i| &rest[i..])
}

fn expect_success(method: &'static str, response: HttpResponse) -> Result<HttpResponse> {
    if response.status == 401 {
        warn!(method, "Credentials rejected");
        return Err(WebDavError::Unauthorized(format!("{} answered 401", method)));
    }
    if response.is_success() {
        Ok(response)
    } else {
        Err(WebDavError::Status {
            method,
            status_code: response.status,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }
}
