use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Provider {provider} authentication failed: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Device authorization failed: {0}")]
    DeviceAuthorizationFailed(String),

    #[error("Device code expired before the user completed authorization")]
    DeviceCodeExpired,

    #[error("User denied access")]
    AccessDenied,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Whether the failure means the stored credential itself is no good
    /// (as opposed to the token endpoint being unreachable).
    pub fn is_credential_rejected(&self) -> bool {
        matches!(
            self,
            AuthError::AuthenticationFailed { .. }
                | AuthError::TokenRefreshFailed(_)
                | AuthError::DeviceCodeExpired
                | AuthError::AccessDenied
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
