//! # Sync Session Bookkeeping
//!
//! Identifiers, phases, counters and the final report of one sync session.
//!
//! ## Phases
//!
//! ```text
//! Begin → FetchServerManifest → ReadLocalManifest → BuildCurrentManifest
//!       → Diff → UpdateManifests → End → (finished)
//! ```
//!
//! A failed `Begin` finishes the session on the spot; every other failure
//! still runs `End`.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Engine phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Begin,
    FetchServerManifest,
    ReadLocalManifest,
    BuildCurrentManifest,
    Diff,
    UpdateManifests,
    End,
    Finished,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Begin => "begin",
            SyncPhase::FetchServerManifest => "fetch_server_manifest",
            SyncPhase::ReadLocalManifest => "read_local_manifest",
            SyncPhase::BuildCurrentManifest => "build_current_manifest",
            SyncPhase::Diff => "diff",
            SyncPhase::UpdateManifests => "update_manifests",
            SyncPhase::End => "end",
            SyncPhase::Finished => "finished",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Session is still running
    Running,
    /// Session reached `End`, possibly with failures or conflicts
    Completed,
    /// `Begin` failed; nothing was attempted
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Transfer counters accumulated during a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Files uploaded
    pub uploads: u64,
    /// Files fetched from the server
    pub downloads: u64,
    /// Files deleted (or archived) on the server
    pub remote_deletes: u64,
    /// Local files removed (or backed up) because the server deleted them
    pub local_deletes: u64,
    /// Keys changed on both sides; resolved in favor of the server
    pub conflicts: u64,
    /// Per-file operations that failed
    pub failures: u64,
}

/// Diff progress as a percentage: cursors passed over the server and current
/// lists, against their combined length. Empty inputs count as done.
pub fn progress_percent(server_pos: usize, current_pos: usize, server_len: usize, current_len: usize) -> u8 {
    let total = server_len + current_len;
    if total == 0 {
        return 100;
    }
    let done = (server_pos + current_pos).min(total);
    ((done * 100) / total) as u8
}

// ============================================================================
// Report
// ============================================================================

/// Final summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: SyncJobId,
    pub status: SyncStatus,
    pub stats: SyncStats,
    pub had_failures: bool,
    pub had_conflicts: bool,
    /// The server manifest changed and was (or should have been) uploaded
    pub need_manifest_upload: bool,
    pub duration: Duration,
}

impl SyncReport {
    /// User-facing one-line summary.
    ///
    /// ```
    /// # use core_sync::{SyncJobId, SyncReport, SyncStats, SyncStatus};
    /// # use std::time::Duration;
    /// let report = SyncReport {
    ///     job_id: SyncJobId::new(),
    ///     status: SyncStatus::Completed,
    ///     stats: SyncStats::default(),
    ///     had_failures: true,
    ///     had_conflicts: true,
    ///     need_manifest_upload: false,
    ///     duration: Duration::from_secs(1),
    /// };
    /// assert_eq!(report.title(), "Cloud Sync finished with failures and conflicts");
    /// ```
    pub fn title(&self) -> String {
        if self.status == SyncStatus::Failed {
            return "Cloud Sync failed".to_string();
        }

        let mut title = String::from("Cloud Sync finished");
        match (self.had_failures, self.had_conflicts) {
            (true, true) => title.push_str(" with failures and conflicts"),
            (true, false) => title.push_str(" with failures"),
            (false, true) => title.push_str(" with conflicts"),
            (false, false) => {}
        }
        title
    }

    pub fn is_clean(&self) -> bool {
        self.status == SyncStatus::Completed && !self.had_failures && !self.had_conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: SyncStatus, had_failures: bool, had_conflicts: bool) -> SyncReport {
        SyncReport {
            job_id: SyncJobId::new(),
            status,
            stats: SyncStats::default(),
            had_failures,
            had_conflicts,
            need_manifest_upload: false,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_titles() {
        assert_eq!(report(SyncStatus::Completed, false, false).title(), "Cloud Sync finished");
        assert_eq!(
            report(SyncStatus::Completed, true, false).title(),
            "Cloud Sync finished with failures"
        );
        assert_eq!(
            report(SyncStatus::Completed, false, true).title(),
            "Cloud Sync finished with conflicts"
        );
        assert_eq!(
            report(SyncStatus::Completed, true, true).title(),
            "Cloud Sync finished with failures and conflicts"
        );
        assert_eq!(report(SyncStatus::Failed, false, false).title(), "Cloud Sync failed");
    }

    #[test]
    fn test_is_clean() {
        assert!(report(SyncStatus::Completed, false, false).is_clean());
        assert!(!report(SyncStatus::Completed, false, true).is_clean());
        assert!(!report(SyncStatus::Failed, false, false).is_clean());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0, 0, 0), 100);
        assert_eq!(progress_percent(0, 0, 2, 2), 0);
        assert_eq!(progress_percent(1, 1, 2, 2), 50);
        assert_eq!(progress_percent(1, 0, 2, 1), 33);
        assert_eq!(progress_percent(2, 1, 2, 1), 100);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Completed".parse::<SyncStatus>().unwrap(), SyncStatus::Completed);
        assert!("bogus".parse::<SyncStatus>().is_err());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
    }

    #[test]
    fn test_phase_order() {
        assert!(SyncPhase::Begin < SyncPhase::Diff);
        assert!(SyncPhase::UpdateManifests < SyncPhase::End);
        assert_eq!(SyncPhase::FetchServerManifest.to_string(), "fetch_server_manifest");
    }
}
