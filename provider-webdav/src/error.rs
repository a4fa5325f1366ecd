//! Error types for the WebDAV provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebDavError {
    /// Server answered 401 with credentials we cannot satisfy
    #[error("Credentials rejected: {0}")]
    Unauthorized(String),

    /// Request finished with an unexpected status
    #[error("WebDAV {method} failed (status {status_code}): {message}")]
    Status {
        method: &'static str,
        status_code: u16,
        message: String,
    },

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, WebDavError>;

impl From<WebDavError> for BridgeError {
    fn from(error: WebDavError) -> Self {
        match error {
            WebDavError::Unauthorized(msg) => BridgeError::Unauthorized(msg),
            WebDavError::Status {
                method,
                status_code,
                message,
            } => BridgeError::Transport(format!(
                "{} failed (status {}): {}",
                method, status_code, message
            )),
            WebDavError::BridgeError(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_bridge_unauthorized() {
        let err: BridgeError = WebDavError::Unauthorized("bad password".into()).into();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_status_display() {
        let err = WebDavError::Status {
            method: "PUT",
            status_code: 507,
            message: "Insufficient Storage".into(),
        };
        assert_eq!(
            err.to_string(),
            "WebDAV PUT failed (status 507): Insufficient Storage"
        );
        let bridge: BridgeError = err.into();
        assert!(matches!(bridge, BridgeError::Transport(_)));
    }
}
