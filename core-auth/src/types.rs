use serde::{Deserialize, Serialize};
use std::fmt;

/// Backends that authenticate through OAuth 2.0.
///
/// WebDAV uses HTTP Basic/Digest credentials and never goes through this crate.
///
/// # Examples
///
/// ```
/// use core_auth::ProviderKind;
///
/// let provider = ProviderKind::GoogleDrive;
/// assert_eq!(provider.display_name(), "Google Drive");
/// assert_eq!(provider.as_str(), "google_drive");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Google Drive v3
    GoogleDrive,
}

impl ProviderKind {
    /// Get the human-readable display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "Google Drive",
        }
    }

    /// Get the provider identifier string, matching the configured driver name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "google_drive",
        }
    }

    /// Parse a provider kind from a driver name
    ///
    /// ```
    /// use core_auth::ProviderKind;
    ///
    /// assert_eq!(ProviderKind::parse("google_drive"), Some(ProviderKind::GoogleDrive));
    /// assert_eq!(ProviderKind::parse("webdav"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google_drive" | "googledrive" => Some(ProviderKind::GoogleDrive),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// OAuth 2.0 token set.
///
/// # Security
///
/// The `Debug` implementation redacts both tokens.
///
/// ```
/// use core_auth::OAuthTokens;
///
/// let tokens = OAuthTokens::new("ya29.a0".to_string(), "1//0g".to_string(), 3600);
/// assert!(!tokens.is_expired());
/// assert!(!format!("{:?}", tokens).contains("ya29"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used for API requests
    pub access_token: String,
    /// The refresh token used to obtain new access tokens
    pub refresh_token: String,
    /// When the access token expires (UTC)
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl OAuthTokens {
    /// Create a token set expiring `expires_in` seconds from now.
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in),
        }
    }

    /// True if the access token expires within the next five minutes.
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_buffer(300)
    }

    /// Check if the access token is expired with a custom buffer
    pub fn is_expired_with_buffer(&self, buffer_seconds: i64) -> bool {
        let now = chrono::Utc::now();
        let buffer = chrono::Duration::seconds(buffer_seconds);
        now >= self.expires_at - buffer
    }
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response of the device-authorization endpoint (RFC 8628 §3.2).
///
/// The user visits `verification_url` and types `user_code`; meanwhile the
/// client polls the token endpoint with `device_code`.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    /// Google names this `verification_url`, RFC 8628 `verification_uri`.
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    /// Seconds until `device_code` stops being accepted
    #[serde(default = "default_device_expires_in")]
    pub expires_in: u64,
    /// Minimum seconds between polls
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

fn default_device_expires_in() -> u64 {
    1800
}

fn default_poll_interval() -> u64 {
    5
}

impl fmt::Debug for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCode")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_url", &self.verification_url)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}
