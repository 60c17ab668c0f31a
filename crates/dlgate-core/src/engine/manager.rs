//! Download Manager - registry and admission control for transfer units
//!
//! This is the top-level coordinator that:
//! - Registers every transfer unit from creation until it retires
//! - Caps concurrently running transfers with a counting admission gate
//! - Routes pause/resume/cancel by identifier

use crate::engine::stop::StopSignal;
use crate::engine::transfer::{ProgressObserver, TransferUnit};
use crate::engine::transport::{HttpTransport, Transport};
use crate::error::DlgateError;
use crate::settings::validate_settings;
use dlgate_types::{CoreEvent, Progress, Settings, TransferId, TransferState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default capacity of the admission gate
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Everything needed to start one download
#[derive(Clone)]
pub struct StartRequest {
    pub url: String,
    pub destination: PathBuf,
    pub observer: Option<ProgressObserver>,
    pub stop: Option<CancellationToken>,
}

impl StartRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            observer: None,
            stop: None,
        }
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// External stop signal; firing it cancels the transfer.
    pub fn with_stop_signal(mut self, token: CancellationToken) -> Self {
        self.stop = Some(token);
        self
    }
}

impl std::fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartRequest")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("observer", &self.observer.is_some())
            .field("stop", &self.stop.is_some())
            .finish()
    }
}

/// Result of driving one transfer to its next resting state
pub type TransferResult = Result<Arc<TransferUnit>, DlgateError>;

/// Download manager that coordinates all transfers
#[derive(Clone)]
pub struct DownloadManager {
    /// Units between creation and terminal retirement
    registry: Arc<RwLock<HashMap<TransferId, Arc<TransferUnit>>>>,
    /// Admission gate
    admission: Arc<Semaphore>,
    capacity: usize,
    /// Shared by all units
    transport: Arc<dyn Transport>,
    /// Event broadcaster
    event_tx: broadcast::Sender<CoreEvent>,
}

impl DownloadManager {
    /// Create a manager with an HTTP transport built from `settings`
    pub fn new(settings: &Settings) -> Result<Self, DlgateError> {
        validate_settings(settings)?;
        let transport = HttpTransport::new(settings)?;
        Self::with_transport(settings.max_concurrent_downloads, Arc::new(transport))
    }

    /// Create a manager over any transport
    pub fn with_transport(
        max_concurrent: usize,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DlgateError> {
        if max_concurrent == 0 {
            return Err(DlgateError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }

        let (event_tx, _) = broadcast::channel(1000);

        Ok(Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            admission: Arc::new(Semaphore::new(max_concurrent)),
            capacity: max_concurrent,
            transport,
            event_tx,
        })
    }

    /// Admission gate capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to manager events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    // ========================================================================
    // Starting transfers
    // ========================================================================

    /// Start a download and wait until it stops.
    ///
    /// The unit is registered before admission is requested, so it is listed
    /// while it waits for a slot. If the stop signal fires during that wait
    /// the unit comes back Cancelled without any network I/O. Transfer
    /// failures are returned as errors; the unit itself is then Failed.
    pub async fn start(&self, request: StartRequest) -> TransferResult {
        let unit = self.create(request)?;
        self.drive(unit).await
    }

    /// Register a download now and drive it on a background task.
    ///
    /// The returned handle is usable immediately, e.g. to pause or cancel
    /// the transfer by id while it is still queued.
    pub fn spawn(
        &self,
        request: StartRequest,
    ) -> Result<(Arc<TransferUnit>, JoinHandle<TransferResult>), DlgateError> {
        let unit = self.create(request)?;
        let manager = self.clone();
        let task_unit = unit.clone();
        let handle = tokio::spawn(async move { manager.drive(task_unit).await });
        Ok((unit, handle))
    }

    /// Drive a resumed (Pending) unit through a fresh admission cycle.
    ///
    /// This is a full restart: the destination is truncated and counters start
    /// from zero. Returns `None` if the unit is not registered, not Pending, or
    /// already has an execution path.
    pub fn restart(&self, id: &str) -> Option<JoinHandle<TransferResult>> {
        let unit = self.get(id)?;
        if !unit.try_claim() {
            debug!("Transfer {} already has an execution path", id);
            return None;
        }

        if unit.state() != TransferState::Pending {
            unit.release_claim();
            // A cancel that raced with the claim may have left retirement to us.
            if unit.state().is_terminal() {
                self.retire(&unit);
            }
            return None;
        }

        info!("Restarting transfer {} from scratch", id);
        unit.clear_pause();
        let manager = self.clone();
        Some(tokio::spawn(async move { manager.drive(unit).await }))
    }

    /// Create, register and claim a new unit
    fn create(&self, request: StartRequest) -> Result<Arc<TransferUnit>, DlgateError> {
        url::Url::parse(&request.url).map_err(|_| DlgateError::InvalidUrl(request.url.clone()))?;
        let destination = resolve_destination(&request.destination)?;

        let unit = Arc::new(TransferUnit::new(
            request.url,
            destination,
            request.observer,
            StopSignal::new(request.stop),
            Some(self.event_tx.clone()),
        ));

        // Claimed before it becomes visible, so a cancel arriving right after
        // registration leaves retirement to the execution path.
        unit.try_claim();

        {
            let mut registry = self.registry.write();
            if let Some(owner) = registry
                .values()
                .find(|u| u.destination() == unit.destination())
            {
                return Err(DlgateError::DestinationInUse {
                    id: owner.id().to_string(),
                    path: unit.destination().to_path_buf(),
                });
            }
            registry.insert(unit.id().clone(), unit.clone());
        }

        info!("Registered transfer {}: {}", unit.id(), unit.url());
        let _ = self.event_tx.send(CoreEvent::TransferAdded {
            transfer: unit.info(),
        });

        Ok(unit)
    }

    /// Admission + transfer for a claimed unit
    async fn drive(&self, unit: Arc<TransferUnit>) -> TransferResult {
        let mut guard = DriveGuard {
            manager: self,
            unit: &unit,
            finished: false,
        };

        let permit = tokio::select! {
            biased;
            _ = unit.stop_signal().stopped() => {
                info!("Transfer {} stopped while waiting for admission", unit.id());
                unit.cancel();
                guard.finished = true;
                drop(guard);
                return Ok(unit);
            }
            permit = self.admission.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    // The gate is never closed while the manager is alive.
                    warn!("Admission gate closed, cancelling transfer {}", unit.id());
                    unit.cancel();
                    guard.finished = true;
                    drop(guard);
                    return Ok(unit);
                }
            },
        };
        debug!(
            "Transfer {} admitted ({} slots free)",
            unit.id(),
            self.admission.available_permits()
        );

        let result = unit.run(self.transport.as_ref()).await;
        // Slot first, then retirement.
        drop(permit);
        guard.finished = true;
        drop(guard);

        result.map(|_| unit)
    }

    // ========================================================================
    // Management
    // ========================================================================

    pub fn get(&self, id: &str) -> Option<Arc<TransferUnit>> {
        self.registry.read().get(id).cloned()
    }

    /// Pause a Downloading unit. Never blocks.
    pub fn pause(&self, id: &str) -> bool {
        match self.get(id) {
            Some(unit) => unit.pause(),
            None => false,
        }
    }

    /// Paused -> Pending. Use [`DownloadManager::restart`] to drive it again.
    pub fn resume(&self, id: &str) -> bool {
        match self.get(id) {
            Some(unit) => unit.resume(),
            None => false,
        }
    }

    /// Cancel a unit from any non-terminal state. True if the id was found.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(unit) = self.get(id) else {
            return false;
        };

        unit.cancel();
        // With no execution path left (e.g. Paused) nobody else will retire it.
        if !unit.is_running() {
            self.retire(&unit);
        }
        true
    }

    /// Point-in-time snapshot of registered units
    pub fn list_active(&self) -> Vec<Arc<TransferUnit>> {
        self.registry.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Pause every Downloading unit. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        self.list_active()
            .iter()
            .filter(|unit| unit.pause())
            .count()
    }

    /// Cancel every registered unit. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.list_active()
            .iter()
            .filter(|unit| self.cancel(unit.id().as_str()))
            .count()
    }

    /// Remove a terminal unit from the registry
    fn retire(&self, unit: &TransferUnit) {
        if self.registry.write().remove(unit.id().as_str()).is_some() {
            debug!("Retired transfer {} ({})", unit.id(), unit.state());
            let _ = self.event_tx.send(CoreEvent::TransferRemoved {
                id: unit.id().clone(),
            });
        }
    }
}

/// Absolute form of `path` in which aliases of the same file compare equal.
///
/// The parent directory must exist. An existing file is resolved in full, so
/// a symlinked destination maps to its target.
fn resolve_destination(path: &Path) -> Result<PathBuf, DlgateError> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| DlgateError::InvalidDestination(path.to_path_buf()))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(std::fs::canonicalize(parent)?.join(file_name))
}

/// Runs on every exit from [`DownloadManager::drive`], including when the
/// driving future is dropped mid-transfer.
struct DriveGuard<'a> {
    manager: &'a DownloadManager,
    unit: &'a Arc<TransferUnit>,
    finished: bool,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && self.unit.cancel() {
            warn!("Transfer {} abandoned by its caller", self.unit.id());
        }
        self.unit.release_claim();
        // Paused and resumed units stay registered for resume/restart/cancel.
        if self.unit.state().is_terminal() {
            self.manager.retire(self.unit);
        }
    }
}
