//! Backend used when no cloud driver is configured.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::storage::CloudStorage;
use bytes::Bytes;
use tracing::debug;

/// Accepts every write and holds nothing. The server manifest never exists,
/// so every sync treats the server as reset and uploads every local file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorage;

#[async_trait]
impl CloudStorage for NullStorage {
    type Session = ();

    fn name(&self) -> &'static str {
        "null"
    }

    fn open_session(&self) -> Self::Session {}

    async fn begin(&self, _session: &Self::Session) -> Result<()> {
        Ok(())
    }

    async fn end(&self, _session: &Self::Session) -> Result<()> {
        Ok(())
    }

    async fn read(&self, _session: &Self::Session, key: &str) -> Result<Option<Bytes>> {
        debug!(key, "null backend read");
        Ok(None)
    }

    async fn update(&self, _session: &Self::Session, key: &str, data: Bytes) -> Result<()> {
        debug!(key, bytes = data.len(), "null backend update");
        Ok(())
    }

    async fn delete(&self, _session: &Self::Session, key: &str) -> Result<()> {
        debug!(key, "null backend delete");
        Ok(())
    }
}
