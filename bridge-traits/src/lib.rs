//! # Host Bridge Traits
//!
//! Abstractions the cloud sync core depends on but does not implement itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with transient-failure retry
//! - [`CloudStorage`](storage::CloudStorage) - Remote store used by the sync engine
//! - [`Clock`](time::Clock) - Time source for deterministic backup names
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Backends must map
//! rejected credentials to `BridgeError::Unauthorized` so the engine can run
//! its refresh-and-retry policy, and report a missing remote object as
//! `Ok(None)` rather than as an error.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across async
//! tasks.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::CloudStorage;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
