//! # WebDAV Provider
//!
//! `CloudStorage` backend for any WebDAV server (Nextcloud, Apache
//! `mod_dav`, NAS appliances).
//!
//! ## Overview
//!
//! - Keys map to paths below the configured base URL, one percent-encoded
//!   path segment per key segment
//! - Parent collections are created with `MKCOL` before uploads
//! - Basic authentication, upgraded to Digest (MD5, MD5-sess) when the server
//!   challenges for it during `begin`
//! - Deletes move the file under `deleted/` with a timestamp suffix unless
//!   destructive deletes are enabled
//!
//! ## Usage
//!
//! ```ignore
//! use provider_webdav::WebDavStorage;
//!
//! let storage = WebDavStorage::new(http_client, &config.webdav, false, clock);
//! let driver = SyncDriver::new(Arc::new(storage), event_bus);
//! ```

pub mod connector;
pub mod digest;
pub mod error;

pub use connector::{normalize_base_url, WebDavSession, WebDavStorage, DELETED_DIR};
pub use digest::{DigestAlgorithm, DigestAuth, DigestChallenge};
pub use error::{Result, WebDavError};
