//! CLI command implementations

use crate::output::{file_name_for, format_bytes, format_state, print_output};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Result};
use console::style;
use dlgate_core::{DownloadManager, HttpTransport, RequestQueue, SettingsStore, StartRequest};
use dlgate_types::{Settings, TransferInfo, TransferState};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ============================================================================
// Download Commands
// ============================================================================

/// One line of the `get` summary
#[derive(Debug, Serialize)]
struct TransferRow {
    url: String,
    destination: Option<PathBuf>,
    /// None when the transfer was rejected before registration
    state: Option<TransferState>,
    bytes_downloaded: u64,
    total_bytes: Option<u64>,
    percent: Option<f64>,
    error: Option<String>,
}

impl TransferRow {
    fn rejected(url: String, error: impl ToString) -> Self {
        Self {
            url,
            destination: None,
            state: None,
            bytes_downloaded: 0,
            total_bytes: None,
            percent: None,
            error: Some(error.to_string()),
        }
    }

    fn completed(&self) -> bool {
        self.state == Some(TransferState::Completed)
    }
}

impl From<TransferInfo> for TransferRow {
    fn from(info: TransferInfo) -> Self {
        let percent = info.progress().percent();
        Self {
            url: info.url,
            destination: Some(info.destination),
            state: Some(info.state),
            bytes_downloaded: info.bytes_downloaded,
            total_bytes: info.total_bytes,
            percent,
            error: info.error,
        }
    }
}

#[derive(Debug, Serialize)]
struct GetSummary {
    transfers: Vec<TransferRow>,
}

impl fmt::Display for GetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.transfers {
            let icon = if row.completed() {
                style("✓").green().bold()
            } else {
                style("✗").red().bold()
            };
            let state = row
                .state
                .map(format_state)
                .unwrap_or_else(|| style("rejected").red().to_string());
            let target = row
                .destination
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| row.url.clone());

            write!(f, "{} {} [{}] {}", icon, target, state, format_bytes(row.bytes_downloaded))?;
            if let Some(percent) = row.percent.filter(|_| !row.completed()) {
                write!(f, " ({:.1}%)", percent)?;
            }
            if let Some(error) = &row.error {
                write!(f, " - {}", style(error).dim())?;
            }
            writeln!(f)?;
        }

        let completed = self.transfers.iter().filter(|r| r.completed()).count();
        write!(
            f,
            "{} of {} download(s) completed",
            style(completed).bold(),
            self.transfers.len()
        )
    }
}

pub async fn get(
    store: &SettingsStore,
    urls: Vec<String>,
    dir: Option<PathBuf>,
    max_concurrent: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut settings = store.load().await?;
    if let Some(n) = max_concurrent {
        settings.max_concurrent_downloads = n;
    }

    let manager = DownloadManager::new(&settings)?;
    let dir = dir.unwrap_or_else(|| settings.default_download_path.clone());
    tokio::fs::create_dir_all(&dir).await?;

    let progress = Arc::new(match format {
        OutputFormat::Human => DownloadProgress::new(),
        OutputFormat::Json => DownloadProgress::hidden(),
    });

    // Ctrl-C cancels every transfer, queued or running.
    let stop = CancellationToken::new();
    let signal_task = tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling downloads");
                stop.cancel();
            }
        }
    });

    let mut events = manager.subscribe();
    let event_task = tokio::spawn({
        let progress = progress.clone();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) => progress.handle_event(&event).await,
                    Err(RecvError::Lagged(n)) => debug!("Progress view skipped {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    let mut rows = Vec::new();
    let mut tasks = Vec::new();
    for (index, raw) in urls.into_iter().enumerate() {
        let parsed = match url::Url::parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                rows.push(TransferRow::rejected(raw, format!("invalid URL: {e}")));
                continue;
            }
        };
        let name = file_name_for(&parsed).unwrap_or_else(|| format!("download-{}", index + 1));

        let pb = progress.add_bar(&name);
        let request = StartRequest::new(raw.clone(), dir.join(&name))
            .with_observer(DownloadProgress::observer(&pb))
            .with_stop_signal(stop.clone());

        match manager.spawn(request) {
            Ok((unit, task)) => {
                progress.track(unit.id().clone(), pb).await;
                tasks.push((unit, task));
            }
            Err(e) => {
                progress.discard(&pb);
                rows.push(TransferRow::rejected(raw, e));
            }
        }
    }

    for (unit, task) in tasks {
        if let Err(e) = task.await? {
            debug!("Transfer {} ended with error: {}", unit.id(), e);
        }
        let info = unit.info();
        progress.settle(&info).await;
        rows.push(TransferRow::from(info));
    }

    event_task.abort();
    signal_task.abort();

    let summary = GetSummary { transfers: rows };
    print_output(&summary, format)?;

    let incomplete = summary.transfers.iter().filter(|r| !r.completed()).count();
    if incomplete > 0 {
        bail!("{} download(s) did not complete", incomplete);
    }

    Ok(())
}

pub async fn fetch(store: &SettingsStore, url: &str, format: OutputFormat) -> Result<()> {
    let settings = store.load().await?;
    let transport = HttpTransport::new(&settings)?;
    let queue = RequestQueue::start(Arc::new(transport));

    let response = queue.fetch(url).await?;
    queue.shutdown().await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Human => {
            if let Some(content) = &response.content {
                println!("{}", content);
            }
            if let Some(error) = &response.error {
                eprintln!("{} {}", style("✗").red().bold(), error);
            }
        }
    }

    if !response.is_success() {
        bail!("request failed with status {}", response.status);
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

/// Settings view for the `config` command
#[derive(Serialize)]
#[serde(transparent)]
struct SettingsView<'a>(&'a Settings);

impl fmt::Display for SettingsView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        writeln!(f, "{}", style("Settings").bold().underlined())?;
        writeln!(f, "  default_download_path:    {}", s.default_download_path.display())?;
        writeln!(f, "  max_concurrent_downloads: {}", s.max_concurrent_downloads)?;
        writeln!(f, "  user_agent:               {}", s.user_agent)?;
        writeln!(f, "  connect_timeout_secs:     {}", s.connect_timeout_secs)?;
        write!(
            f,
            "  read_timeout_secs:        {}",
            s.read_timeout_secs
                .map(|t| t.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }
}

pub async fn config_action(
    store: &SettingsStore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let settings = store.load().await?;
            print_output(&SettingsView(&settings), format)?;
        }
        ConfigAction::Set { key, value } => {
            let mut settings = store.load().await?;
            apply_setting(&mut settings, &key, &value)?;
            store.save(&settings).await?;
            println!("{} {} = {}", style("✓").green().bold(), key, value);
        }
        ConfigAction::Reset => {
            store.save(&Settings::default()).await?;
            println!("{} Settings reset to defaults", style("✓").green().bold());
        }
        ConfigAction::Path => {
            println!("{}", store.path().display());
        }
    }

    Ok(())
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "default_download_path" => settings.default_download_path = PathBuf::from(value),
        "max_concurrent_downloads" => settings.max_concurrent_downloads = value.parse()?,
        "user_agent" => settings.user_agent.set(value),
        "engine_version" => settings.user_agent.set_engine_version(value),
        "browser_version" => settings.user_agent.set_browser_version(value),
        "connect_timeout_secs" => settings.connect_timeout_secs = value.parse()?,
        "read_timeout_secs" => {
            settings.read_timeout_secs = match value {
                "none" | "" => None,
                secs => Some(secs.parse()?),
            }
        }
        other => return Err(anyhow!("Unknown setting: {}", other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_settings() {
        let mut settings = Settings::default();
        apply_setting(&mut settings, "max_concurrent_downloads", "8").unwrap();
        apply_setting(&mut settings, "read_timeout_secs", "15").unwrap();
        apply_setting(&mut settings, "browser_version", "2.0.0").unwrap();

        assert_eq!(settings.max_concurrent_downloads, 8);
        assert_eq!(settings.read_timeout_secs, Some(15));
        assert!(settings.user_agent.as_str().ends_with("OriginBrowser/2.0.0"));

        apply_setting(&mut settings, "read_timeout_secs", "none").unwrap();
        assert_eq!(settings.read_timeout_secs, None);
    }

    #[test]
    fn test_apply_rejects_unknown_and_malformed() {
        let mut settings = Settings::default();
        assert!(apply_setting(&mut settings, "segments", "4").is_err());
        assert!(apply_setting(&mut settings, "max_concurrent_downloads", "many").is_err());
    }

    #[test]
    fn test_summary_counts_completed() {
        let summary = GetSummary {
            transfers: vec![
                TransferRow {
                    url: "https://example.com/a".to_string(),
                    destination: Some(PathBuf::from("a")),
                    state: Some(TransferState::Completed),
                    bytes_downloaded: 10,
                    total_bytes: Some(10),
                    percent: Some(100.0),
                    error: None,
                },
                TransferRow::rejected("nope".to_string(), "invalid URL"),
            ],
        };
        let text = console::strip_ansi_codes(&summary.to_string()).into_owned();
        assert!(text.contains("rejected"));
        assert!(text.ends_with("1 of 2 download(s) completed"));
    }

    #[test]
    fn test_unfinished_row_shows_percent() {
        let info = TransferInfo {
            id: dlgate_types::TransferId::new(),
            url: "https://example.com/big.iso".to_string(),
            destination: PathBuf::from("big.iso"),
            state: TransferState::Cancelled,
            bytes_downloaded: 50,
            total_bytes: Some(200),
            error: None,
            created_at: chrono::Utc::now(),
            finished_at: None,
        };

        let row = TransferRow::from(info);
        assert_eq!(row.percent, Some(25.0));

        let summary = GetSummary { transfers: vec![row] };
        let text = console::strip_ansi_codes(&summary.to_string()).into_owned();
        assert!(text.contains("(25.0%)"));
    }
}
