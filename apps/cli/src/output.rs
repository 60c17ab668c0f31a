//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use dlgate_types::TransferState;
use serde::Serialize;

/// Print output in the specified format
pub fn print_output<T: Serialize + std::fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Colored state label for terminal output
pub fn format_state(state: TransferState) -> String {
    let label = state.to_string();
    match state {
        TransferState::Completed => style(label).green().to_string(),
        TransferState::Failed => style(label).red().to_string(),
        TransferState::Cancelled => style(label).dim().to_string(),
        TransferState::Paused => style(label).yellow().to_string(),
        TransferState::Pending | TransferState::Downloading => style(label).cyan().to_string(),
    }
}

/// File name for a URL: last non-empty path segment, else the host
pub fn file_name_for(url: &url::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
}
