//! # Sync Engine
//!
//! Sans-IO state machine reconciling three manifests:
//!
//! - **server**: `manifest.server` as fetched from the backend
//! - **local**: `manifest.local`, the state after the last successful sync
//! - **current**: what is on disk right now
//!
//! The engine never performs network I/O itself. [`SyncEngine::step`] either
//! does a bounded amount of local work, or hands out a [`BackendRequest`] with a
//! [`ResumeToken`]; the caller performs the request and reports the outcome
//! through [`SyncEngine::resume`], exactly once per token. Several requests can
//! be outstanding during the diff phase.
//!
//! ## Auth retry
//!
//! A request failing with `Unauthorized` for the first time is followed by a
//! `RefreshAuth` request and then re-issued once. A second rejection, or a
//! failed refresh, is final for that operation. `Begin` and `End` are never
//! retried.
//!
//! ## Conflicts
//!
//! When both sides changed a key since the last sync, the server copy wins: it
//! is fetched over the local file (which is moved to `cloud_backups/` unless
//! destructive) and its hash is recorded in both updated manifests.

use crate::error::{Result, SyncError};
use crate::hasher;
use crate::job::{progress_percent, SyncJobId, SyncPhase, SyncReport, SyncStats, SyncStatus};
use crate::local::LocalStore;
use crate::manifest::{
    cmp_heads, Cursor, Manifest, ManifestBuilder, ManifestEntry, LOCAL_MANIFEST_NAME,
    SERVER_MANIFEST_NAME,
};
use crate::scanner::{self, DirectoryMap, IgnoreRules, LocalFile};
use bridge_traits::error::BridgeError;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::config::{CloudSyncConfig, DEFAULT_MAX_IN_FLIGHT};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// Interface Types
// ============================================================================

/// Handle pairing a [`BackendRequest`] with its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken(u64);

impl ResumeToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A backend call the engine wants performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
    Begin,
    End,
    Read { key: String },
    Update { key: String, data: Bytes },
    Delete { key: String },
    RefreshAuth,
}

impl BackendRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendRequest::Begin => "begin",
            BackendRequest::End => "end",
            BackendRequest::Read { .. } => "read",
            BackendRequest::Update { .. } => "update",
            BackendRequest::Delete { .. } => "delete",
            BackendRequest::RefreshAuth => "refresh_auth",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            BackendRequest::Read { key }
            | BackendRequest::Update { key, .. }
            | BackendRequest::Delete { key } => Some(key),
            _ => None,
        }
    }
}

/// Outcome of a backend call. `Ok(None)` is a successful read of a missing object
/// (and the result of every call that returns no data).
pub type BackendResult = std::result::Result<Option<Bytes>, BridgeError>;

/// What the caller should do next.
#[derive(Debug)]
pub enum Step {
    /// Perform the request and call [`SyncEngine::resume`] with the token.
    Issue(ResumeToken, BackendRequest),
    /// Local work was done; call `step` again.
    Continue,
    /// Blocked on outstanding requests; call `step` again after a completion or a short delay.
    Wait,
    /// Session over.
    Finished(SyncReport),
}

// ============================================================================
// Settings
// ============================================================================

/// Everything the engine needs besides the backend.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub directories: DirectoryMap,
    pub ignore: IgnoreRules,
    pub local: LocalStore,
    /// Requests allowed in flight during the diff phase
    pub max_in_flight: usize,
}

impl SyncSettings {
    pub fn new(directories: DirectoryMap, local: LocalStore) -> Self {
        Self {
            directories,
            ignore: IgnoreRules::default(),
            local,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn from_config(config: &CloudSyncConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let core_assets = config
            .directories
            .core_assets
            .clone()
            .ok_or_else(|| SyncError::MissingDirectory {
                root: "core_assets".to_string(),
            })?;

        Ok(Self {
            directories: DirectoryMap::from_config(config)?,
            ignore: IgnoreRules::from_config(config),
            local: LocalStore::new(core_assets, config.destructive, clock),
            max_in_flight: config.max_in_flight.max(1),
        })
    }

    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }
}

// ============================================================================
// Pending Operations
// ============================================================================

#[derive(Debug)]
enum OpKind {
    Begin,
    FetchServerManifest,
    Fetch {
        key: String,
        server_hash: String,
        local: Option<ManifestEntry>,
        path: PathBuf,
        conflict: bool,
    },
    Upload {
        key: String,
        hash: String,
        server: Option<ManifestEntry>,
        local: Option<ManifestEntry>,
    },
    RemoteDelete {
        key: String,
        server: ManifestEntry,
        local: ManifestEntry,
    },
    UploadServerManifest,
    End,
}

impl OpKind {
    fn retries_auth(&self) -> bool {
        !matches!(self, OpKind::Begin | OpKind::End)
    }
}

#[derive(Debug)]
struct PendingOp {
    kind: OpKind,
    request: BackendRequest,
    /// 0 on first issue, 1 after an auth refresh
    attempt: u8,
    /// Waiting on `RefreshAuth` rather than on `request`
    refreshing: bool,
}

#[derive(Debug)]
enum Queued {
    Refresh(PendingOp),
    Reissue(PendingOp),
}

// ============================================================================
// Engine
// ============================================================================

/// One sync session. Create a fresh engine per run.
pub struct SyncEngine {
    job_id: SyncJobId,
    phase: SyncPhase,
    status: SyncStatus,
    settings: SyncSettings,

    server: Cursor<ManifestEntry>,
    local: Cursor<ManifestEntry>,
    current: Cursor<LocalFile>,
    updated_server: ManifestBuilder,
    updated_local: ManifestBuilder,
    final_server: Option<Manifest>,
    final_local: Option<Manifest>,

    stats: SyncStats,
    had_failures: bool,
    had_conflicts: bool,
    need_manifest_upload: bool,

    pending: HashMap<u64, PendingOp>,
    queue: VecDeque<Queued>,
    next_token: u64,
    started: Instant,
    report: Option<SyncReport>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            job_id: SyncJobId::new(),
            phase: SyncPhase::Begin,
            status: SyncStatus::Running,
            settings,
            server: Cursor::default(),
            local: Cursor::default(),
            current: Cursor::default(),
            updated_server: ManifestBuilder::new(),
            updated_local: ManifestBuilder::new(),
            final_server: None,
            final_local: None,
            stats: SyncStats::default(),
            had_failures: false,
            had_conflicts: false,
            need_manifest_upload: false,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_token: 0,
            started: Instant::now(),
            report: None,
        }
    }

    pub fn job_id(&self) -> SyncJobId {
        self.job_id
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn report(&self) -> Option<&SyncReport> {
        self.report.as_ref()
    }

    /// The updated local manifest, once `UpdateManifests` has run.
    pub fn updated_local_manifest(&self) -> Option<&Manifest> {
        self.final_local.as_ref()
    }

    /// The updated server manifest, once `UpdateManifests` has run.
    pub fn updated_server_manifest(&self) -> Option<&Manifest> {
        self.final_server.as_ref()
    }

    /// Diff progress in percent; 0 before the diff, 100 after it.
    pub fn progress(&self) -> u8 {
        match self.phase {
            SyncPhase::Begin
            | SyncPhase::FetchServerManifest
            | SyncPhase::ReadLocalManifest
            | SyncPhase::BuildCurrentManifest => 0,
            SyncPhase::Diff => progress_percent(
                self.server.position(),
                self.current.position(),
                self.server.len(),
                self.current.len(),
            ),
            SyncPhase::UpdateManifests | SyncPhase::End | SyncPhase::Finished => 100,
        }
    }

    /// True when `step` would return [`Step::Wait`].
    pub fn is_waiting(&self) -> bool {
        if self.phase == SyncPhase::Finished || !self.queue.is_empty() {
            return false;
        }
        if self.phase == SyncPhase::Diff {
            self.pending.len() >= self.settings.max_in_flight
        } else {
            !self.pending.is_empty()
        }
    }

    /// Advance the session by one unit of work.
    pub fn step(&mut self) -> Step {
        if let Some(report) = &self.report {
            return Step::Finished(report.clone());
        }

        if let Some(queued) = self.queue.pop_front() {
            return match queued {
                Queued::Refresh(op) => {
                    info!(request = op.request.kind(), key = ?op.request.key(), "Refreshing credentials before retry");
                    self.issue(PendingOp {
                        refreshing: true,
                        ..op
                    })
                }
                Queued::Reissue(op) => {
                    debug!(request = op.request.kind(), key = ?op.request.key(), "Re-issuing after refresh");
                    self.issue(op)
                }
            };
        }

        if self.is_waiting() {
            return Step::Wait;
        }

        match self.phase {
            SyncPhase::Begin => {
                info!(job_id = %self.job_id, "Cloud sync starting");
                self.issue_new(OpKind::Begin, BackendRequest::Begin)
            }
            SyncPhase::FetchServerManifest => self.issue_new(
                OpKind::FetchServerManifest,
                BackendRequest::Read {
                    key: SERVER_MANIFEST_NAME.to_string(),
                },
            ),
            SyncPhase::ReadLocalManifest => {
                let manifest = self.settings.local.read_manifest(LOCAL_MANIFEST_NAME);
                debug!(entries = manifest.len(), "Read local manifest");
                self.local = manifest.into();
                self.phase = SyncPhase::BuildCurrentManifest;
                Step::Continue
            }
            SyncPhase::BuildCurrentManifest => {
                let files = scanner::scan(&self.settings.directories, &self.settings.ignore);
                info!(files = files.len(), "Built current manifest");
                self.current = Cursor::new(files);
                self.phase = SyncPhase::Diff;
                Step::Continue
            }
            SyncPhase::Diff => match self.diff_next() {
                Some((kind, request)) => self.issue_new(kind, request),
                None => Step::Continue,
            },
            SyncPhase::UpdateManifests => self.update_manifests(),
            SyncPhase::End => self.issue_new(OpKind::End, BackendRequest::End),
            SyncPhase::Finished => Step::Wait,
        }
    }

    /// Deliver the outcome of the request identified by `token`.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownToken`] if the token is not outstanding, including a
    /// second delivery for the same token.
    pub fn resume(&mut self, token: ResumeToken, result: BackendResult) -> Result<()> {
        let op = self
            .pending
            .remove(&token.0)
            .ok_or(SyncError::UnknownToken(token.0))?;

        if op.refreshing {
            match result {
                Ok(_) => self.queue.push_back(Queued::Reissue(PendingOp {
                    refreshing: false,
                    ..op
                })),
                Err(e) => {
                    warn!(error = %e, "Credential refresh failed");
                    self.complete(op.kind, Err(e));
                }
            }
            return Ok(());
        }

        match result {
            Err(e) if e.is_unauthorized() && op.attempt == 0 && op.kind.retries_auth() => {
                info!(request = op.request.kind(), key = ?op.request.key(), "Request unauthorized");
                self.queue.push_back(Queued::Refresh(PendingOp { attempt: 1, ..op }));
            }
            result => self.complete(op.kind, result),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Issuing
    // ------------------------------------------------------------------------

    fn issue_new(&mut self, kind: OpKind, request: BackendRequest) -> Step {
        self.issue(PendingOp {
            kind,
            request,
            attempt: 0,
            refreshing: false,
        })
    }

    fn issue(&mut self, op: PendingOp) -> Step {
        let token = ResumeToken(self.next_token);
        self.next_token += 1;

        let request = if op.refreshing {
            BackendRequest::RefreshAuth
        } else {
            op.request.clone()
        };
        self.pending.insert(token.0, op);
        Step::Issue(token, request)
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    fn complete(&mut self, kind: OpKind, result: BackendResult) {
        match kind {
            OpKind::Begin => match result {
                Ok(_) => {
                    info!("Backend session started");
                    self.phase = SyncPhase::FetchServerManifest;
                }
                Err(e) => {
                    error!(error = %e, "Could not begin cloud sync session");
                    self.finish(SyncStatus::Failed);
                }
            },
            OpKind::FetchServerManifest => match result {
                Ok(Some(bytes)) => {
                    let manifest = Manifest::decode_or_empty(&bytes, SERVER_MANIFEST_NAME);
                    info!(entries = manifest.len(), "Fetched server manifest");
                    self.server = manifest.into();
                    self.phase = SyncPhase::ReadLocalManifest;
                }
                Ok(None) => {
                    info!("No server manifest yet");
                    self.phase = SyncPhase::ReadLocalManifest;
                }
                Err(e) => {
                    error!(error = %e, "Server manifest fetch failed, aborting");
                    self.had_failures = true;
                    self.phase = SyncPhase::End;
                }
            },
            OpKind::Fetch {
                key,
                server_hash,
                local,
                path,
                conflict,
            } => self.complete_fetch(key, server_hash, local, path, conflict, result),
            OpKind::Upload {
                key,
                hash,
                server,
                local,
            } => match result {
                Ok(_) => {
                    info!(key = %key, "Uploaded");
                    self.updated_server.record(&key, &hash);
                    self.updated_local.record(&key, &hash);
                    self.need_manifest_upload = true;
                    self.stats.uploads += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Upload failed");
                    self.record_failure(server.as_ref(), local.as_ref());
                }
            },
            OpKind::RemoteDelete { key, server, local } => match result {
                Ok(_) => {
                    info!(key = %key, "Deleted on server");
                    self.updated_server.record_tombstone(&key);
                    self.updated_local.record_tombstone(&key);
                    self.need_manifest_upload = true;
                    self.stats.remote_deletes += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Remote delete failed");
                    self.record_failure(Some(&server), Some(&local));
                }
            },
            OpKind::UploadServerManifest => {
                match result {
                    Ok(_) => info!("Uploaded server manifest"),
                    Err(e) => {
                        warn!(error = %e, "Uploading server manifest failed");
                        self.had_failures = true;
                    }
                }
                self.phase = SyncPhase::End;
            }
            OpKind::End => {
                if let Err(e) = result {
                    warn!(error = %e, "Ending backend session failed");
                    self.had_failures = true;
                }
                self.finish(SyncStatus::Completed);
            }
        }
    }

    fn complete_fetch(
        &mut self,
        key: String,
        server_hash: String,
        local: Option<ManifestEntry>,
        path: PathBuf,
        conflict: bool,
        result: BackendResult,
    ) {
        let bytes = match result {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(key = %key, "Fetch failed: not found on server");
                self.record_failure(None, local.as_ref());
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Fetch failed");
                self.record_failure(None, local.as_ref());
                return;
            }
        };

        if let Err(e) = self.settings.local.store_fetched(&key, &path, &bytes) {
            warn!(key = %key, error = %e, "Could not write fetched file");
            self.record_failure(None, local.as_ref());
            return;
        }

        let hash = if conflict {
            server_hash
        } else {
            hasher::hash_bytes(&bytes)
        };
        info!(key = %key, bytes = bytes.len(), "Fetched");
        self.updated_local.record(&key, &hash);
        self.stats.downloads += 1;
    }

    /// A per-file failure: keep whatever was known before so the next run retries.
    fn record_failure(&mut self, server: Option<&ManifestEntry>, local: Option<&ManifestEntry>) {
        self.had_failures = true;
        self.stats.failures += 1;
        self.updated_server.carry(server);
        self.updated_local.carry(local);
    }

    fn finish(&mut self, status: SyncStatus) {
        self.status = status;
        self.phase = SyncPhase::Finished;

        let report = SyncReport {
            job_id: self.job_id,
            status,
            stats: self.stats,
            had_failures: self.had_failures,
            had_conflicts: self.had_conflicts,
            need_manifest_upload: self.need_manifest_upload,
            duration: self.started.elapsed(),
        };

        info!(
            title = %report.title(),
            uploads = report.stats.uploads,
            downloads = report.stats.downloads,
            remote_deletes = report.stats.remote_deletes,
            local_deletes = report.stats.local_deletes,
            conflicts = report.stats.conflicts,
            duration_ms = report.duration.as_millis() as u64,
            "Cloud sync session over"
        );
        self.report = Some(report);
    }

    // ------------------------------------------------------------------------
    // Update manifests
    // ------------------------------------------------------------------------

    fn update_manifests(&mut self) -> Step {
        let server = std::mem::take(&mut self.updated_server).build();
        let local = std::mem::take(&mut self.updated_local).build();

        let store = &self.settings.local;
        if let Err(e) = store.write_manifest(LOCAL_MANIFEST_NAME, &local) {
            error!(error = %e, "Could not write local manifest");
            self.had_failures = true;
        }
        if let Err(e) = store.write_manifest(SERVER_MANIFEST_NAME, &server) {
            warn!(error = %e, "Could not cache server manifest");
        }

        let upload = if self.need_manifest_upload {
            match server.encode() {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) => {
                    error!(error = %e, "Could not encode server manifest");
                    self.had_failures = true;
                    None
                }
            }
        } else {
            debug!("Server manifest unchanged");
            None
        };

        self.final_server = Some(server);
        self.final_local = Some(local);

        match upload {
            Some(data) => {
                info!("Uploading updated server manifest");
                self.issue_new(
                    OpKind::UploadServerManifest,
                    BackendRequest::Update {
                        key: SERVER_MANIFEST_NAME.to_string(),
                        data,
                    },
                )
            }
            None => {
                self.phase = SyncPhase::End;
                Step::Continue
            }
        }
    }

    // ------------------------------------------------------------------------
    // Diff
    // ------------------------------------------------------------------------

    /// One merge step. Returns a request to issue, if the step needs I/O.
    fn diff_next(&mut self) -> Option<(OpKind, BackendRequest)> {
        let server = self.server.peek().cloned();
        let local = self.local.peek().cloned();
        let current = self.current.peek().cloned();

        if server.is_none() && local.is_none() && current.is_none() {
            info!("Finished processing manifests");
            self.phase = SyncPhase::UpdateManifests;
            return None;
        }

        match cmp_heads(server.as_ref(), local.as_ref()) {
            Ordering::Less => {
                // the server has a key the last sync never saw
                let s = server?;
                match cmp_heads(Some(&s), current.as_ref()) {
                    Ordering::Less => {
                        self.server.advance();
                        self.server_only(s)
                    }
                    Ordering::Equal => {
                        self.server.advance();
                        self.current.advance();
                        let c = current?;
                        self.check_server_current(s, None, c)
                    }
                    Ordering::Greater => {
                        self.current.advance();
                        self.upload(current?, None, None)
                    }
                }
            }
            Ordering::Equal => match cmp_heads(current.as_ref(), local.as_ref()) {
                Ordering::Less => {
                    self.current.advance();
                    self.upload(current?, None, None)
                }
                Ordering::Equal => {
                    self.server.advance();
                    self.local.advance();
                    self.current.advance();
                    self.check_server_current(server?, local, current?)
                }
                Ordering::Greater => {
                    // deleted locally since the last sync
                    self.server.advance();
                    self.local.advance();
                    self.deleted_locally(server?, local?)
                }
            },
            Ordering::Greater => {
                // the server lost a key the last sync recorded; treat the server as reset
                match cmp_heads(current.as_ref(), local.as_ref()) {
                    Ordering::Less => {
                        self.current.advance();
                        self.upload(current?, None, None)
                    }
                    Ordering::Equal => {
                        self.current.advance();
                        self.local.advance();
                        self.upload(current?, None, local)
                    }
                    Ordering::Greater => {
                        self.local.advance();
                        let l = local?;
                        if !l.is_tombstone() {
                            warn!(key = %l.key(), "Only present in the previous manifest");
                        }
                        self.updated_local.record_tombstone(l.key());
                        None
                    }
                }
            }
        }
    }

    /// Keys the engine must leave alone: ignored files and keys outside the
    /// mapped roots. Their prior entries are carried forward.
    fn untouchable(
        &mut self,
        key: &str,
        server: Option<&ManifestEntry>,
        local: Option<&ManifestEntry>,
    ) -> bool {
        if self.settings.ignore.is_ignored(key) {
            debug!(key, "Ignoring");
        } else if self.settings.directories.resolve(key).is_none() {
            warn!(key, "Not under a mapped root, leaving untouched");
        } else {
            return false;
        }
        self.updated_server.carry(server);
        self.updated_local.carry(local);
        true
    }

    fn server_only(&mut self, s: ManifestEntry) -> Option<(OpKind, BackendRequest)> {
        if s.is_tombstone() {
            debug!(key = %s.key(), "Deleted on server, never seen here");
            self.updated_server.record_tombstone(s.key());
            self.updated_local.record_tombstone(s.key());
            return None;
        }
        self.fetch(s, None, false)
    }

    fn check_server_current(
        &mut self,
        s: ManifestEntry,
        l: Option<ManifestEntry>,
        c: LocalFile,
    ) -> Option<(OpKind, BackendRequest)> {
        if self.untouchable(s.key(), Some(&s), l.as_ref()) {
            return None;
        }

        let current_hash = match hasher::hash_file(&c.path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(key = %c.key, error = %e, "Could not hash local file");
                self.record_failure(Some(&s), l.as_ref());
                return None;
            }
        };

        if s.hash() == current_hash {
            debug!(key = %s.key(), "In sync");
            self.updated_server.record(s.key(), &current_hash);
            self.updated_local.record(s.key(), &current_hash);
            return None;
        }

        let Some(l) = l else {
            // never synced from here; the server wins, tombstone included
            return self.conflict(s, None, c);
        };

        let server_changed = l.hash() != s.hash();
        let current_changed = l.hash() != current_hash;

        if server_changed && current_changed {
            self.conflict(s, Some(l), c)
        } else if current_changed {
            self.upload(c, Some(s), Some(l))
        } else if !s.is_tombstone() {
            self.fetch(s, Some(l), false)
        } else {
            self.delete_locally(s, l, c);
            None
        }
    }

    fn deleted_locally(
        &mut self,
        s: ManifestEntry,
        l: ManifestEntry,
    ) -> Option<(OpKind, BackendRequest)> {
        if self.untouchable(s.key(), Some(&s), Some(&l)) {
            return None;
        }

        if s.is_tombstone() {
            self.updated_server.record_tombstone(s.key());
            self.updated_local.record_tombstone(s.key());
            None
        } else if l.is_tombstone() {
            debug!(key = %s.key(), "Recreated on server");
            self.fetch(s, Some(l), false)
        } else if s.hash() == l.hash() {
            info!(key = %s.key(), "Deleting on server");
            let key = s.key().to_string();
            Some((
                OpKind::RemoteDelete {
                    key: key.clone(),
                    server: s,
                    local: l,
                },
                BackendRequest::Delete { key },
            ))
        } else {
            warn!(key = %s.key(), "Changed on server but deleted locally");
            self.had_conflicts = true;
            self.stats.conflicts += 1;
            self.fetch(s, Some(l), true)
        }
    }

    fn conflict(
        &mut self,
        s: ManifestEntry,
        l: Option<ManifestEntry>,
        c: LocalFile,
    ) -> Option<(OpKind, BackendRequest)> {
        warn!(key = %s.key(), "Conflicting change, keeping the server version");
        self.had_conflicts = true;
        self.stats.conflicts += 1;

        if s.is_tombstone() {
            let l = l.unwrap_or_else(|| ManifestEntry::tombstone(s.key()));
            self.delete_locally(s, l, c);
            return None;
        }
        self.fetch(s, l, true)
    }

    fn fetch(
        &mut self,
        s: ManifestEntry,
        l: Option<ManifestEntry>,
        conflict: bool,
    ) -> Option<(OpKind, BackendRequest)> {
        if self.untouchable(s.key(), Some(&s), l.as_ref()) {
            return None;
        }
        let path = self.settings.directories.resolve(s.key())?;

        // fetching does not change the server
        self.updated_server.record(s.key(), s.hash());

        info!(key = %s.key(), conflict, "Fetching");
        let key = s.key().to_string();
        Some((
            OpKind::Fetch {
                key: key.clone(),
                server_hash: s.hash().to_string(),
                local: l,
                path,
                conflict,
            },
            BackendRequest::Read { key },
        ))
    }

    fn upload(
        &mut self,
        c: LocalFile,
        s: Option<ManifestEntry>,
        l: Option<ManifestEntry>,
    ) -> Option<(OpKind, BackendRequest)> {
        if self.untouchable(&c.key, s.as_ref(), l.as_ref()) {
            return None;
        }

        let data = match fs::read(&c.path) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(key = %c.key, error = %e, "Could not read local file");
                self.record_failure(s.as_ref(), l.as_ref());
                return None;
            }
        };

        info!(key = %c.key, bytes = data.len(), "Uploading");
        let hash = hasher::hash_bytes(&data);
        Some((
            OpKind::Upload {
                key: c.key.clone(),
                hash,
                server: s,
                local: l,
            },
            BackendRequest::Update { key: c.key, data },
        ))
    }

    /// The server deleted `c`; remove it here and record the deletion.
    fn delete_locally(&mut self, s: ManifestEntry, l: ManifestEntry, c: LocalFile) {
        warn!(key = %c.key, "Deleted on server, removing local copy");
        match self.settings.local.remove(&c.key, &c.path) {
            Ok(()) => {
                self.updated_server.record_tombstone(s.key());
                self.updated_local.record_tombstone(s.key());
                self.stats.local_deletes += 1;
            }
            Err(e) => {
                warn!(key = %c.key, error = %e, "Could not remove local file");
                self.record_failure(Some(&s), Some(&l));
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("job_id", &self.job_id)
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("in_flight", &self.pending.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
