//! Remote Storage Abstraction
//!
//! The `CloudStorage` trait is the seam between the sync engine and a concrete
//! remote store (WebDAV, Google Drive, ...). Every call receives the session
//! object created for the current sync run, so per-run state such as access
//! tokens, digest nonces or discovered folder ids never outlives the run.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Pluggable remote store addressed by slash-separated manifest keys.
///
/// Implementations authenticate inside [`begin`](CloudStorage::begin) and keep
/// whatever they learn in their `Session`. They never retry on
/// [`BridgeError::Unauthorized`](crate::error::BridgeError::Unauthorized):
/// the caller decides whether to call [`refresh_auth`](CloudStorage::refresh_auth)
/// and re-issue the operation.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::CloudStorage;
///
/// async fn fetch_manifest<S: CloudStorage>(storage: &S) -> Result<Option<Bytes>> {
///     let session = storage.open_session();
///     storage.begin(&session).await?;
///     let manifest = storage.read(&session, "manifest.server").await;
///     storage.end(&session).await?;
///     manifest
/// }
/// ```
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Per-run session state. Uses interior mutability where needed; several
    /// operations of one run may be in flight at the same time.
    type Session: Send + Sync;

    /// Backend identifier, as used in configuration (`"webdav"`, ...).
    fn name(&self) -> &'static str;

    /// Create fresh session state for one sync run.
    fn open_session(&self) -> Self::Session;

    /// Authenticate and discover whatever the backend needs. Idempotent.
    async fn begin(&self, session: &Self::Session) -> Result<()>;

    /// Release session state. Called once per run, even after failures.
    async fn end(&self, session: &Self::Session) -> Result<()>;

    /// Fetch a remote object. A missing object is `Ok(None)`.
    async fn read(&self, session: &Self::Session, key: &str) -> Result<Option<Bytes>>;

    /// Create or replace a remote object.
    async fn update(&self, session: &Self::Session, key: &str, data: Bytes) -> Result<()>;

    /// Remove a remote object, or archive it when the backend is not in
    /// destructive mode. Deleting a missing object succeeds.
    async fn delete(&self, session: &Self::Session, key: &str) -> Result<()>;

    /// Renew credentials after an `Unauthorized` failure.
    async fn refresh_auth(&self, session: &Self::Session) -> Result<()> {
        let _ = session;
        Ok(())
    }
}
