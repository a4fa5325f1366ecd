//! OAuth 2.0 token acquisition for cloud backends
//!
//! Two flows are supported:
//! - Refresh-token grant (RFC 6749 §6), used on every session start once a
//!   refresh token is known.
//! - Device authorization grant (RFC 8628), used when no refresh token has been
//!   configured yet. The user is shown a verification URL and a short code
//!   while the client polls the token endpoint.
//!
//! Sensitive values (tokens, device codes, client secrets) are never logged.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthConfig, OAuthFlowManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = OAuthConfig::google_drive("client-id", Some("client-secret".to_string()));
//! let manager = OAuthFlowManager::new(config, http_client);
//!
//! let code = manager.request_device_code().await?;
//! println!("Visit {} and enter {}", code.verification_url, code.user_code);
//! let tokens = manager.poll_device_token(&code).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{DeviceCode, OAuthTokens, ProviderKind};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_DEVICE_CODE_URL: &str = "https://oauth2.googleapis.com/device/code";
const GOOGLE_DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Extra wait added to the poll interval on `slow_down` (RFC 8628 §3.5).
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// OAuth 2.0 provider configuration.
#[derive(Clone)]
pub struct OAuthConfig {
    pub provider: ProviderKind,
    pub client_id: String,
    /// Optional for public clients
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Device authorization endpoint URL
    pub device_auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
}

impl OAuthConfig {
    /// Google endpoints with the `drive.file` scope: the app only sees files it created.
    pub fn google_drive(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            provider: ProviderKind::GoogleDrive,
            client_id: client_id.into(),
            client_secret,
            scopes: vec![GOOGLE_DRIVE_FILE_SCOPE.to_string()],
            device_auth_url: GOOGLE_DEVICE_CODE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scopes", &self.scopes)
            .field("device_auth_url", &self.device_auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// OAuth 2.0 flow manager.
pub struct OAuthFlowManager {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
}

impl OAuthFlowManager {
    pub fn new(config: OAuthConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Refresh an access token using a refresh token.
    ///
    /// Server errors are retried up to three times with exponential backoff.
    /// A 4xx answer means the refresh token was rejected and fails immediately.
    /// If the provider does not rotate the refresh token, the old one is kept.
    #[instrument(skip(self, refresh_token), fields(provider = %self.config.provider))]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.config.client_id);

        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret);
        }

        debug!("Refreshing access token");

        let encoded_body = serde_urlencoded::to_string(&params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        let mut attempts = 0;
        const MAX_RETRIES: u32 = 3;

        loop {
            attempts += 1;

            let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
                .form(encoded_body.clone());

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|e| AuthError::NetworkError(e.to_string()))?;

            if response.is_success() {
                let token_response = parse_token_response(&response)?;

                info!(
                    expires_in = token_response.expires_in,
                    "Successfully refreshed access token"
                );

                return Ok(OAuthTokens::new(
                    token_response.access_token,
                    token_response
                        .refresh_token
                        .unwrap_or_else(|| refresh_token.to_string()),
                    token_response.expires_in,
                ));
            }

            let status = response.status;

            if response.is_client_error() {
                let error_body = error_text(&response);
                warn!(status, error = %error_body, "Token refresh rejected");

                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, error_body
                )));
            }

            if attempts >= MAX_RETRIES {
                return Err(AuthError::NetworkError(format!(
                    "Token refresh failed after {} attempts. Last status: {} - {}",
                    attempts,
                    status,
                    error_text(&response)
                )));
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                status,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            sleep(delay).await;
        }
    }

    /// Start a device authorization (RFC 8628 §3.1).
    #[instrument(skip(self), fields(provider = %self.config.provider))]
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let scope = self.config.scopes.join(" ");
        let mut params = HashMap::new();
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("scope", scope.as_str());

        let encoded_body = serde_urlencoded::to_string(&params)
            .map_err(|e| AuthError::Other(format!("Failed to encode device request: {}", e)))?;

        let request = HttpRequest::new(HttpMethod::Post, self.config.device_auth_url.clone())
            .form(encoded_body);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        if !response.is_success() {
            let error_body = error_text(&response);
            warn!(status = response.status, error = %error_body, "Device code request failed");
            return Err(AuthError::DeviceAuthorizationFailed(format!(
                "Device endpoint returned {}: {}",
                response.status, error_body
            )));
        }

        let code: DeviceCode = response
            .json()
            .map_err(|e| AuthError::Other(format!("Failed to parse device code response: {}", e)))?;

        info!(
            verification_url = %code.verification_url,
            expires_in = code.expires_in,
            "Device authorization started"
        );

        Ok(code)
    }

    /// Poll the token endpoint until the user approves the device code.
    ///
    /// Honors `authorization_pending` and `slow_down`; gives up with
    /// [`AuthError::DeviceCodeExpired`] once `expires_in` has elapsed.
    #[instrument(skip(self, code), fields(provider = %self.config.provider))]
    pub async fn poll_device_token(&self, code: &DeviceCode) -> Result<OAuthTokens> {
        let mut params = HashMap::new();
        params.insert("grant_type", DEVICE_CODE_GRANT);
        params.insert("device_code", code.device_code.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret);
        }

        let encoded_body = serde_urlencoded::to_string(&params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);

        loop {
            sleep(interval).await;

            if Instant::now() >= deadline {
                warn!("Device code expired while waiting for approval");
                return Err(AuthError::DeviceCodeExpired);
            }

            let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
                .form(encoded_body.clone());

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|e| AuthError::NetworkError(e.to_string()))?;

            if response.is_success() {
                let token_response = parse_token_response(&response)?;
                let refresh_token = token_response.refresh_token.ok_or_else(|| {
                    AuthError::DeviceAuthorizationFailed(
                        "Token response carried no refresh token".to_string(),
                    )
                })?;

                info!("Device authorization approved");
                return Ok(OAuthTokens::new(
                    token_response.access_token,
                    refresh_token,
                    token_response.expires_in,
                ));
            }

            let error = response
                .json::<TokenErrorResponse>()
                .map(|e| e.error)
                .unwrap_or_default();

            match error.as_str() {
                "authorization_pending" => {
                    debug!("Authorization pending");
                }
                "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "Asked to slow down");
                }
                "access_denied" => return Err(AuthError::AccessDenied),
                "expired_token" => return Err(AuthError::DeviceCodeExpired),
                _ => {
                    let error_body = error_text(&response);
                    warn!(status = response.status, error = %error_body, "Device token poll failed");
                    return Err(AuthError::AuthenticationFailed {
                        provider: self.config.provider.as_str().to_string(),
                        reason: format!("Token endpoint returned {}: {}", response.status, error_body),
                    });
                }
            }
        }
    }
}

/// Token response from the OAuth provider.
#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse> {
    response
        .json()
        .map_err(|e| AuthError::Other(format!("Failed to parse token response: {}", e)))
}

fn error_text(response: &HttpResponse) -> String {
    response
        .text()
        .unwrap_or_else(|_| "Unable to read error response".to_string())
}
