//! Workspace facade crate.
//!
//! Host applications can depend on `cloudsync-workspace` and pick up the
//! service layer with the desktop bridge wired in, instead of depending on
//! each workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
