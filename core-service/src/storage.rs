//! Backend selection by name.
//!
//! `SyncDriver` is generic over one `CloudStorage`; the service picks the
//! backend at runtime, so the concrete backends are wrapped in an enum that
//! forwards every call.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::CloudStorage;
use bytes::Bytes;
use core_sync::NullStorage;
use provider_google_drive::{GoogleDriveSession, GoogleDriveStorage};
use provider_webdav::{WebDavSession, WebDavStorage};

pub const WEBDAV: &str = "webdav";
pub const GOOGLE_DRIVE: &str = "google_drive";
pub const NULL: &str = "null";

/// One of the supported backends.
pub enum AnyStorage {
    WebDav(WebDavStorage),
    GoogleDrive(GoogleDriveStorage),
    Null(NullStorage),
}

/// Session of whichever backend an [`AnyStorage`] wraps.
pub enum AnySession {
    WebDav(WebDavSession),
    GoogleDrive(GoogleDriveSession),
    Null(()),
}

macro_rules! dispatch {
    ($storage:expr, $session:expr, |$s:ident, $sess:ident| $body:expr) => {
        match ($storage, $session) {
            (AnyStorage::WebDav($s), AnySession::WebDav($sess)) => $body,
            (AnyStorage::GoogleDrive($s), AnySession::GoogleDrive($sess)) => $body,
            (AnyStorage::Null($s), AnySession::Null($sess)) => $body,
            _ => Err(BridgeError::OperationFailed(
                "session was opened by a different backend".to_string(),
            )),
        }
    };
}

#[async_trait]
impl CloudStorage for AnyStorage {
    type Session = AnySession;

    fn name(&self) -> &'static str {
        match self {
            AnyStorage::WebDav(s) => s.name(),
            AnyStorage::GoogleDrive(s) => s.name(),
            AnyStorage::Null(s) => s.name(),
        }
    }

    fn open_session(&self) -> Self::Session {
        match self {
            AnyStorage::WebDav(s) => AnySession::WebDav(s.open_session()),
            AnyStorage::GoogleDrive(s) => AnySession::GoogleDrive(s.open_session()),
            AnyStorage::Null(s) => AnySession::Null(s.open_session()),
        }
    }

    async fn begin(&self, session: &Self::Session) -> BridgeResult<()> {
        dispatch!(self, session, |s, sess| s.begin(sess).await)
    }

    async fn end(&self, session: &Self::Session) -> BridgeResult<()> {
        dispatch!(self, session, |s, sess| s.end(sess).await)
    }

    async fn read(&self, session: &Self::Session, key: &str) -> BridgeResult<Option<Bytes>> {
        dispatch!(self, session, |s, sess| s.read(sess, key).await)
    }

    async fn update(&self, session: &Self::Session, key: &str, data: Bytes) -> BridgeResult<()> {
        dispatch!(self, session, |s, sess| s.update(sess, key, data).await)
    }

    async fn delete(&self, session: &Self::Session, key: &str) -> BridgeResult<()> {
        dispatch!(self, session, |s, sess| s.delete(sess, key).await)
    }

    async fn refresh_auth(&self, session: &Self::Session) -> BridgeResult<()> {
        dispatch!(self, session, |s, sess| s.refresh_auth(sess).await)
    }
}
