//! # Cloud Sync Engine
//!
//! Keeps a set of local directories in step with a remote store by comparing
//! three manifests:
//!
//! - the **server** manifest, fetched from the backend
//! - the **local** manifest, saved after the previous sync
//! - the **current** manifest, scanned from disk
//!
//! ## Components
//!
//! - **Manifests** (`manifest`): sorted key/hash lists, their JSON codec and merge cursors
//! - **Scanner** (`scanner`): root directory mapping, ignore rules and the disk walk
//! - **Local store** (`local`): backups, atomic writes and manifest files
//! - **Engine** (`engine`): sans-IO state machine producing backend requests
//! - **Driver** (`driver`): runs the engine against a [`CloudStorage`](bridge_traits::storage::CloudStorage) with bounded concurrency
//! - **Null backend** (`backend`): used when no driver is configured

pub mod backend;
pub mod driver;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod job;
pub mod local;
pub mod manifest;
pub mod scanner;

pub use backend::NullStorage;
pub use driver::{SingleFlight, SingleFlightPermit, SyncDriver};
pub use engine::{BackendRequest, BackendResult, ResumeToken, Step, SyncEngine, SyncSettings};
pub use error::{Result, SyncError};
pub use job::{SyncJobId, SyncPhase, SyncReport, SyncStats, SyncStatus};
pub use local::{LocalStore, BACKUP_DIR_NAME};
pub use manifest::{
    Manifest, ManifestBuilder, ManifestEntry, LOCAL_MANIFEST_NAME, SERVER_MANIFEST_NAME,
};
pub use scanner::{DirectoryMap, IgnoreRules, LocalFile, SyncRoot};
