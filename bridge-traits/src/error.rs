use thiserror::Error;

/// Errors crossing the host/backend boundary.
///
/// Storage backends report "object does not exist" as `Ok(None)` rather than
/// an error, so there is no not-found variant here.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// No response, connection failure, or an unexpected status from the remote.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote rejected our credentials (HTTP 401 or an expired token).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True when a credential refresh might make a retry succeed.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BridgeError::Unauthorized(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_classification() {
        assert!(BridgeError::Unauthorized("401".into()).is_unauthorized());
        assert!(!BridgeError::Transport("reset".into()).is_unauthorized());
        assert!(!BridgeError::Io(std::io::Error::other("disk")).is_unauthorized());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }
}
