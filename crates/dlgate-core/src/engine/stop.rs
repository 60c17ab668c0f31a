//! Composed stop signal for a transfer unit
//!
//! A transfer stops when either the caller's external token fires or the
//! manager raises one of the unit's internal flags (pause or cancel). Every
//! async wait of a transfer (admission, headers, the next body chunk) races
//! against [`StopSignal::stopped`]; [`StopSignal::stop_reason`] is the
//! non-blocking check.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Why a transfer was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Paused,
    Cancelled,
}

/// External token OR internal pause/cancel flags
#[derive(Debug)]
pub struct StopSignal {
    external: CancellationToken,
    paused: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new(external: Option<CancellationToken>) -> Self {
        Self {
            // A fresh token never fires, so "no external signal" needs no branch.
            external: external.unwrap_or_default(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Cancel wins over pause when both fired.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Acquire) || self.external.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.paused.load(Ordering::Acquire) {
            Some(StopReason::Paused)
        } else {
            None
        }
    }

    pub fn raise_pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn raise_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Clear a previous pause before the unit is driven again.
    /// Cancellation is permanent and is not affected.
    pub fn clear_pause(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Resolves once any of the composed signals fires.
    pub async fn stopped(&self) -> StopReason {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flags so a raise between
            // the check and the await is not lost.
            notified.as_mut().enable();

            if let Some(reason) = self.stop_reason() {
                return reason;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.external.cancelled() => {}
            }
        }
    }
}
