//! Transfer unit - the life cycle of one download
//!
//! A unit owns its state machine, byte counters and stop signal. The
//! execution path (driven by the manager) streams the response body in fixed
//! 8 KiB chunks straight into the destination file, checking the stop signal
//! only between chunks.

use crate::engine::stop::{StopReason, StopSignal};
use crate::engine::transport::Transport;
use crate::error::DlgateError;
use chrono::{DateTime, Utc};
use dlgate_types::{CoreEvent, Progress, TransferId, TransferInfo, TransferState};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use fs2::FileExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Size of one body chunk
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Called synchronously after every chunk. Must not block for long.
///
/// Snapshots always carry `TransferState::Downloading`: a chunk that was
/// already being written when a pause or cancel landed is still reported as
/// part of the download.
pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

struct StateCell {
    state: TransferState,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// One download, shared between the caller's handle and its execution path
pub struct TransferUnit {
    id: TransferId,
    url: String,
    destination: PathBuf,
    state: Mutex<StateCell>,
    bytes_downloaded: AtomicU64,
    total_bytes: Mutex<Option<u64>>,
    stop: StopSignal,
    observer: Option<ProgressObserver>,
    /// Set while an execution path owns the unit
    running: AtomicBool,
    created_at: DateTime<Utc>,
    event_tx: Option<broadcast::Sender<CoreEvent>>,
}

/// How the body loop ended when it did not fail
enum Outcome {
    Exhausted,
    Stopped(StopReason),
}

impl TransferUnit {
    pub(crate) fn new(
        url: String,
        destination: PathBuf,
        observer: Option<ProgressObserver>,
        stop: StopSignal,
        event_tx: Option<broadcast::Sender<CoreEvent>>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            url,
            destination,
            state: Mutex::new(StateCell {
                state: TransferState::Pending,
                error: None,
                finished_at: None,
            }),
            bytes_downloaded: AtomicU64::new(0),
            total_bytes: Mutex::new(None),
            stop,
            observer,
            running: AtomicBool::new(false),
            created_at: Utc::now(),
            event_tx,
        }
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> TransferState {
        self.state.lock().state
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> Option<u64> {
        *self.total_bytes.lock()
    }

    /// Error message of a Failed unit
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn info(&self) -> TransferInfo {
        let cell = self.state.lock();
        TransferInfo {
            id: self.id.clone(),
            url: self.url.clone(),
            destination: self.destination.clone(),
            state: cell.state,
            bytes_downloaded: self.bytes_downloaded(),
            total_bytes: self.total_bytes(),
            error: cell.error.clone(),
            created_at: self.created_at,
            finished_at: cell.finished_at,
        }
    }

    /// Whether an execution path currently owns this unit
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Downloading -> Paused. Raises the internal pause flag; the execution
    /// path stops at its next chunk boundary.
    pub fn pause(&self) -> bool {
        {
            let mut cell = self.state.lock();
            if cell.state != TransferState::Downloading {
                return false;
            }
            cell.state = TransferState::Paused;
            self.stop.raise_pause();
            self.emit_state(TransferState::Paused, None);
        }
        info!("Paused transfer {} at {} bytes", self.id, self.bytes_downloaded());
        true
    }

    /// Paused -> Pending. Does not restart anything by itself.
    pub fn resume(&self) -> bool {
        if !self.transition(TransferState::Paused, TransferState::Pending) {
            return false;
        }
        info!("Resumed transfer {} (pending)", self.id);
        true
    }

    /// Force Cancelled from any non-terminal state. Returns whether the state
    /// changed; the stop signal is raised either way.
    pub fn cancel(&self) -> bool {
        self.stop.raise_cancel();
        let changed = self.finish(TransferState::Cancelled, None);
        if changed {
            info!("Cancelled transfer {}", self.id);
        }
        changed
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub(crate) fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Claim the unit for one execution path. Fails if another path holds it.
    pub(crate) fn try_claim(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn release_claim(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Prepare a paused-then-resumed unit for a fresh cycle
    pub(crate) fn clear_pause(&self) {
        self.stop.clear_pause();
    }

    /// Run the transfer to a stop, completion or failure.
    ///
    /// Must be called by the holder of the run claim, after admission.
    /// Returns the state the unit ended in; transfer failures are returned as
    /// errors after the unit has been marked Failed.
    pub(crate) async fn run(&self, transport: &dyn Transport) -> Result<TransferState, DlgateError> {
        if !self.begin() {
            let state = self.state();
            debug!("Transfer {} not started, state is {}", self.id, state);
            return Ok(state);
        }

        info!("Starting transfer {}: {} -> {}", self.id, self.url, self.destination.display());

        match self.download(transport).await {
            Ok(Outcome::Exhausted) => {
                if self.finish(TransferState::Completed, None) {
                    info!("Transfer {} completed ({} bytes)", self.id, self.bytes_downloaded());
                }
                Ok(self.state())
            }
            Ok(Outcome::Stopped(StopReason::Paused)) => {
                // pause() already moved the state; a resume may even have
                // moved it on to Pending.
                self.finish(TransferState::Paused, None);
                let state = self.state();
                debug!("Transfer {} stopped for pause, state is {}", self.id, state);
                Ok(state)
            }
            Ok(Outcome::Stopped(StopReason::Cancelled)) => {
                self.finish(TransferState::Cancelled, None);
                info!("Transfer {} cancelled at {} bytes", self.id, self.bytes_downloaded());
                Ok(self.state())
            }
            Err(e) => {
                warn!("Transfer {} failed: {}", self.id, e);
                self.finish(TransferState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Pending -> Downloading with fresh counters, unless a stop already fired.
    fn begin(&self) -> bool {
        {
            let mut cell = self.state.lock();
            if cell.state != TransferState::Pending {
                return false;
            }
            if self.stop.stop_reason() == Some(StopReason::Cancelled) {
                drop(cell);
                self.finish(TransferState::Cancelled, None);
                return false;
            }
            cell.state = TransferState::Downloading;
            self.bytes_downloaded.store(0, Ordering::Release);
            *self.total_bytes.lock() = None;
            self.emit_state(TransferState::Downloading, None);
        }
        true
    }

    async fn download(&self, transport: &dyn Transport) -> Result<Outcome, DlgateError> {
        let response = tokio::select! {
            biased;
            reason = self.stop.stopped() => return Ok(Outcome::Stopped(reason)),
            response = transport.get(&self.url) => response?,
        };

        if !response.is_success() {
            return Err(DlgateError::ServerError {
                status: response.status,
                message: format!("GET {} failed", self.url),
            });
        }

        let total = response.content_length;
        *self.total_bytes.lock() = total;
        debug!("Transfer {} headers received, total: {:?}", self.id, total);

        // Opened only after a success status so failed requests leave no file.
        // Truncated only once the exclusive lock is held.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.destination)
            .await?;
        let file = file.into_std().await;
        if file.try_lock_exclusive().is_err() {
            return Err(DlgateError::DestinationLocked(self.destination.clone()));
        }
        file.set_len(0)?;
        let mut file = File::from_std(file);

        let mut reader = StreamReader::new(response.body);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            // biased: a raised signal wins over a ready chunk.
            let n = tokio::select! {
                biased;
                reason = self.stop.stopped() => return Ok(Outcome::Stopped(reason)),
                n = read_chunk(&mut reader, &mut buf) => n?,
            };
            if n == 0 {
                break;
            }

            let received = self.bytes_downloaded() + n as u64;
            if let Some(expected) = total {
                if received > expected {
                    return Err(DlgateError::LengthMismatch { expected, received });
                }
            }

            file.write_all(&buf[..n]).await?;
            file.flush().await?;
            self.bytes_downloaded.store(received, Ordering::Release);

            if let Some(observer) = &self.observer {
                observer(Progress {
                    bytes_downloaded: received,
                    total_bytes: total,
                    state: TransferState::Downloading,
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        let received = self.bytes_downloaded();
        if let Some(expected) = total {
            if received != expected {
                return Err(DlgateError::LengthMismatch { expected, received });
            }
        }

        Ok(Outcome::Exhausted)
    }

    // ========================================================================
    // State bookkeeping
    // ========================================================================

    /// Move `from` -> `to` only if the unit is currently in `from`.
    fn transition(&self, from: TransferState, to: TransferState) -> bool {
        {
            let mut cell = self.state.lock();
            if cell.state != from || !from.can_transition_to(to) {
                return false;
            }
            cell.state = to;
            self.emit_state(to, None);
        }
        true
    }

    /// Move to `next` if the state machine allows it from wherever the unit
    /// is now. Returns whether the state changed.
    fn finish(&self, next: TransferState, error: Option<String>) -> bool {
        {
            let mut cell = self.state.lock();
            if !cell.state.can_transition_to(next) {
                return false;
            }
            cell.state = next;
            cell.error = error.clone();
            if next.is_terminal() {
                cell.finished_at = Some(Utc::now());
            }
            self.emit_state(next, error);
        }
        true
    }

    /// Called with the state lock held so events leave in transition order.
    fn emit_state(&self, state: TransferState, error: Option<String>) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(CoreEvent::TransferStateChanged {
                id: self.id.clone(),
                state,
                error,
            });
        }
    }
}

impl std::fmt::Debug for TransferUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferUnit")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("state", &self.state())
            .field("bytes_downloaded", &self.bytes_downloaded())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}

/// Fill `buf` completely unless the body ends first. Returns 0 at end of body.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
