//! # Google Drive Provider
//!
//! Implements `CloudStorage` for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - OAuth 2.0 authentication (refresh token, or the device flow on first use)
//! - An app folder holding every synced file, named by manifest key
//! - Media download and upload
//! - Archive-by-rename deletes unless destructive
//! - Backoff on rate limits and server errors

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{
    DeviceCodeCallback, GoogleDriveSession, GoogleDriveStorage, TokenCallback, APP_FOLDER_NAME,
};
pub use error::{GoogleDriveError, Result};
