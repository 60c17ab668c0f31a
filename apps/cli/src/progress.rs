//! Progress bar utilities for CLI downloads

use console::style;
use dlgate_types::{CoreEvent, Progress, TransferId, TransferInfo, TransferState};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg:24} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Manages progress bars for multiple transfers
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: Arc<RwLock<HashMap<TransferId, ProgressBar>>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Progress that draws nothing (machine-readable output)
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a bar before the transfer exists, so its observer can drive it
    pub fn add_bar(&self, name: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_message(name.to_string());
        pb
    }

    /// Observer that mirrors chunk progress onto `pb`
    pub fn observer(pb: &ProgressBar) -> impl Fn(Progress) + Send + Sync + 'static {
        let pb = pb.clone();
        move |p: Progress| {
            if let Some(total) = p.total_bytes {
                pb.set_length(total);
            }
            pb.set_position(p.bytes_downloaded);
        }
    }

    /// Associate a bar with its transfer so state events reach it
    pub async fn track(&self, id: TransferId, pb: ProgressBar) {
        self.bars.write().await.insert(id, pb);
    }

    /// Update a progress bar from an event
    pub async fn handle_event(&self, event: &CoreEvent) {
        if let CoreEvent::TransferStateChanged { id, state, error } = event {
            let bars = self.bars.read().await;
            if let Some(pb) = bars.get(id) {
                apply_state(pb, *state, error.as_deref());
            }
        }
    }

    /// Settle a bar from the final view of its transfer
    pub async fn settle(&self, info: &TransferInfo) {
        if let Some(pb) = self.bars.write().await.remove(&info.id) {
            apply_state(&pb, info.state, info.error.as_deref());
        }
    }

    /// Drop a bar whose transfer never got registered
    pub fn discard(&self, pb: &ProgressBar) {
        pb.finish_and_clear();
        self.multi.remove(pb);
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_state(pb: &ProgressBar, state: TransferState, error: Option<&str>) {
    if pb.is_finished() {
        return;
    }

    match state {
        TransferState::Completed => {
            pb.finish_with_message(format!("{} done", style("✓").green().bold()));
        }
        TransferState::Failed => {
            pb.abandon_with_message(format!(
                "{} {}",
                style("✗").red().bold(),
                error.unwrap_or("failed")
            ));
        }
        TransferState::Cancelled => {
            pb.abandon_with_message(format!("{} cancelled", style("○").dim()));
        }
        TransferState::Paused => {
            pb.set_message(format!("{} paused", style("⏸").yellow()));
        }
        TransferState::Pending | TransferState::Downloading => {}
    }
}
