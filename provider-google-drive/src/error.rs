//! Error types for Google Drive provider

use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// `begin` has not produced an access token for this session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The API answered 401
    #[error("Access token rejected: {0}")]
    Unauthorized(String),

    /// Token refresh or device authorization failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// API request returned an error
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl From<GoogleDriveError> for BridgeError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::NotAuthenticated => {
                BridgeError::Unauthorized("no access token for this session".to_string())
            }
            GoogleDriveError::Unauthorized(msg) => BridgeError::Unauthorized(msg),
            GoogleDriveError::Auth(e) if e.is_credential_rejected() => {
                BridgeError::Unauthorized(e.to_string())
            }
            GoogleDriveError::Auth(e) => BridgeError::Transport(e.to_string()),
            GoogleDriveError::ApiError {
                status_code,
                message,
            } => BridgeError::Transport(format!("API error (status {}): {}", status_code, message)),
            GoogleDriveError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            GoogleDriveError::BridgeError(e) => e,
        }
    }
}
