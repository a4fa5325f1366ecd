//! # Sync Driver
//!
//! Runs a [`SyncEngine`] against a [`CloudStorage`] backend.
//!
//! Requests handed out by the engine are polled together in a
//! `FuturesUnordered`, so during the diff several transfers overlap. When the
//! engine has to wait, the driver sleeps until either a request completes or
//! the poll interval elapses.
//!
//! Only one run may be active per driver; a second [`SyncDriver::run`] while
//! one is in progress fails with [`SyncError::AlreadyRunning`].

use crate::engine::{BackendRequest, BackendResult, Step, SyncEngine, SyncSettings};
use crate::error::{Result, SyncError};
use crate::job::{SyncPhase, SyncReport, SyncStatus};
use bridge_traits::storage::CloudStorage;
use core_runtime::config::DEFAULT_POLL_INTERVAL_MS;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SyncEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Single-flight guard
// ============================================================================

/// Admits at most one holder at a time.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if it is held.
    pub fn try_acquire(&self) -> Option<SingleFlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct SingleFlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SingleFlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct SyncDriver<S: CloudStorage> {
    storage: Arc<S>,
    event_bus: Arc<EventBus>,
    guard: SingleFlight,
    poll_interval: Duration,
}

impl<S: CloudStorage> SyncDriver<S> {
    pub fn new(storage: Arc<S>, event_bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            event_bus,
            guard: SingleFlight::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Share a guard with other drivers so that they exclude each other.
    pub fn with_guard(mut self, guard: SingleFlight) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_busy()
    }

    /// Run one complete sync session.
    ///
    /// Per-file failures and conflicts are reported in the returned
    /// [`SyncReport`], not as errors.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyRunning`] if another run holds the guard.
    #[instrument(skip(self, settings), fields(driver = self.storage.name()))]
    pub async fn run(&self, settings: SyncSettings) -> Result<SyncReport> {
        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Cloud sync already in progress");
            self.event_bus.emit(CoreEvent::Sync(SyncEvent::AlreadyRunning));
            return Err(SyncError::AlreadyRunning);
        };

        let driver = self.storage.name();
        let mut engine = SyncEngine::new(settings);
        let job_id = engine.job_id().to_string();
        let session = self.storage.open_session();

        info!(job_id = %job_id, "Cloud Sync in progress");
        self.event_bus.emit(CoreEvent::Sync(SyncEvent::Started {
            job_id: job_id.clone(),
            driver: driver.to_string(),
        }));

        let storage = &*self.storage;
        let session = &session;
        let event_bus = &*self.event_bus;
        let mut in_flight = FuturesUnordered::new();
        let mut last_progress: Option<(SyncPhase, u8)> = None;

        loop {
            // Deliver whatever already finished before asking for more work.
            while let Some(Some((token, result))) = in_flight.next().now_or_never() {
                engine.resume(token, result)?;
            }

            let step = engine.step();
            self.report_progress(&engine, &job_id, &mut last_progress);

            match step {
                Step::Issue(token, request) => {
                    debug!(request = request.kind(), key = ?request.key(), "Issuing");
                    in_flight.push(async move {
                        (token, perform(storage, session, event_bus, request).await)
                    });
                }
                Step::Continue => {}
                Step::Wait => {
                    tokio::select! {
                        biased;
                        Some((token, result)) = in_flight.next() => {
                            engine.resume(token, result)?;
                        }
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Step::Finished(report) => {
                    self.emit_finished(&job_id, &report);
                    return Ok(report);
                }
            }
        }
    }

    fn report_progress(
        &self,
        engine: &SyncEngine,
        job_id: &str,
        last: &mut Option<(SyncPhase, u8)>,
    ) {
        let now = (engine.phase(), engine.progress());
        if *last == Some(now) || now.0 == SyncPhase::Finished {
            return;
        }
        *last = Some(now);
        self.event_bus.emit(CoreEvent::Sync(SyncEvent::Progress {
            job_id: job_id.to_string(),
            percent: now.1,
            phase: now.0.to_string(),
        }));
    }

    fn emit_finished(&self, job_id: &str, report: &SyncReport) {
        let event = match report.status {
            SyncStatus::Failed => SyncEvent::Failed {
                job_id: job_id.to_string(),
                message: report.title(),
            },
            _ => SyncEvent::Completed {
                job_id: job_id.to_string(),
                uploads: report.stats.uploads,
                downloads: report.stats.downloads,
                remote_deletes: report.stats.remote_deletes,
                local_deletes: report.stats.local_deletes,
                conflicts: report.stats.conflicts,
                failures: report.had_failures,
                duration_ms: report.duration.as_millis() as u64,
            },
        };
        self.event_bus.emit(CoreEvent::Sync(event));
    }
}

impl<S: CloudStorage> std::fmt::Debug for SyncDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDriver")
            .field("storage", &self.storage.name())
            .field("running", &self.is_running())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Execute one engine request against the backend.
async fn perform<S: CloudStorage>(
    storage: &S,
    session: &S::Session,
    event_bus: &EventBus,
    request: BackendRequest,
) -> BackendResult {
    match request {
        BackendRequest::Begin => storage.begin(session).await.map(|_| None),
        BackendRequest::End => storage.end(session).await.map(|_| None),
        BackendRequest::Read { key } => storage.read(session, &key).await,
        BackendRequest::Update { key, data } => {
            storage.update(session, &key, data).await.map(|_| None)
        }
        BackendRequest::Delete { key } => storage.delete(session, &key).await.map(|_| None),
        BackendRequest::RefreshAuth => {
            let driver = storage.name().to_string();
            event_bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing {
                driver: driver.clone(),
            }));
            let result = storage.refresh_auth(session).await;
            if let Err(e) = &result {
                event_bus.emit(CoreEvent::Auth(AuthEvent::AuthError {
                    driver,
                    message: e.to_string(),
                }));
            }
            result.map(|_| None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let guard = SingleFlight::new();
        let permit = guard.try_acquire().expect("first acquire");
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_shared_guard_excludes_clones() {
        let guard = SingleFlight::new();
        let other = guard.clone();
        let _permit = guard.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }
}
