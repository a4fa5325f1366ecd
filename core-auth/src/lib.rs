//! # Authentication Module
//!
//! OAuth 2.0 token handling for cloud sync backends.
//!
//! ## Overview
//!
//! Backends that authenticate with OAuth (currently Google Drive) use this crate
//! to turn a stored refresh token into a short-lived access token, or, on first
//! use, to run the device authorization flow where the user approves access on
//! another device.
//!
//! ## Features
//!
//! - Refresh-token grant with retry on server errors
//! - Device authorization grant (RFC 8628) with `slow_down` handling
//! - Token types whose `Debug` output never includes secrets

pub mod error;
pub mod oauth;
pub mod types;

pub use error::{AuthError, Result};
pub use oauth::{OAuthConfig, OAuthFlowManager};
pub use types::{DeviceCode, OAuthTokens, ProviderKind};
