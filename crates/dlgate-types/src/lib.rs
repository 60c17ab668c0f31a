//! Shared types for DLGate
//!
//! This crate contains the plain data structures used by the core
//! library and the CLI: identifiers, transfer states, progress snapshots,
//! events and settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Transfer Types
// ============================================================================

/// Opaque identifier of a transfer unit. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TransferId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// State of a transfer unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    /// Completed, Cancelled and Failed have no outgoing transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// ```text
    /// Pending ──► Downloading ──► Completed | Paused | Cancelled | Failed
    ///    ▲                           │
    ///    └────────── resume ─────────┘
    /// ```
    ///
    /// Cancel may also force Pending or Paused straight to Cancelled. An
    /// execution path that fails after a pause or resume already moved the
    /// state still lands on Failed.
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Pending, Downloading) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Downloading, Completed)
            | (Downloading, Paused)
            | (Downloading, Cancelled)
            | (Downloading, Failed) => true,
            (Paused, Pending) | (Paused, Cancelled) | (Paused, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Pending => "pending",
            TransferState::Downloading => "downloading",
            TransferState::Paused => "paused",
            TransferState::Completed => "completed",
            TransferState::Cancelled => "cancelled",
            TransferState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress snapshot handed to observers after every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub state: TransferState,
}

impl Progress {
    /// Percentage in `0.0..=100.0`, or `None` when the size is unknown
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_downloaded as f64 / total as f64) * 100.0),
            None => None,
        }
    }
}

/// Point-in-time view of a transfer unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferInfo {
    pub id: TransferId,
    pub url: String,
    pub destination: PathBuf,
    pub state: TransferState,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferInfo {
    pub fn progress(&self) -> Progress {
        Progress {
            bytes_downloaded: self.bytes_downloaded,
            total_bytes: self.total_bytes,
            state: self.state,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the download manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    TransferAdded {
        transfer: TransferInfo,
    },
    TransferStateChanged {
        id: TransferId,
        state: TransferState,
        error: Option<String>,
    },
    TransferRemoved {
        id: TransferId,
    },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_download_path: PathBuf,
    /// Capacity of the admission gate
    pub max_concurrent_downloads: usize,
    pub user_agent: UserAgent,
    pub connect_timeout_secs: u64,
    /// Per-read timeout on the body stream (None = no timeout)
    pub read_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_path: dirs::download_dir()
                .map(|p| p.join("DLGate"))
                .unwrap_or_else(|| PathBuf::from(".")),
            max_concurrent_downloads: 4,
            user_agent: UserAgent::default(),
            connect_timeout_secs: 30,
            read_timeout_secs: None,
        }
    }
}

const ENGINE_TOKEN: &str = "Vostro/";
const BROWSER_TOKEN: &str = "OriginBrowser/";

/// User agent string sent with every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserAgent(String);

impl UserAgent {
    pub fn new(agent: impl Into<String>) -> Self {
        Self(agent.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn set(&mut self, agent: impl Into<String>) {
        self.0 = agent.into();
    }

    /// Replace the version of the `Vostro/` engine token
    pub fn set_engine_version(&mut self, version: &str) {
        self.replace_token(ENGINE_TOKEN, version);
    }

    /// Replace the version of the `OriginBrowser/` product token
    pub fn set_browser_version(&mut self, version: &str) {
        self.replace_token(BROWSER_TOKEN, version);
    }

    // A missing token leaves the string untouched.
    fn replace_token(&mut self, token: &str, version: &str) {
        let Some(start) = self.0.find(token) else {
            return;
        };
        let version_start = start + token.len();
        let version_end = self.0[version_start..]
            .find(char::is_whitespace)
            .map(|i| version_start + i)
            .unwrap_or(self.0.len());
        self.0.replace_range(version_start..version_end, version);
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
             Vostro/1.0 (KHTML, like Gecko) \
             OriginBrowser/0.3.0"
                .to_string(),
        )
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Cancelled.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Pending.is_terminal());
        assert!(!TransferState::Downloading.is_terminal());
        assert!(!TransferState::Paused.is_terminal());
    }

    #[test]
    fn test_no_transition_leaves_terminal_state() {
        use TransferState::*;
        let all = [Pending, Downloading, Paused, Completed, Cancelled, Failed];
        for from in all.iter().copied().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_pause_resume_cycle() {
        use TransferState::*;
        assert!(Downloading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Downloading));
        assert!(!Paused.can_transition_to(Downloading));
        assert!(!Pending.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_transfer_ids_are_unique() {
        let a = TransferId::new();
        let b = TransferId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&TransferState::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }

    #[test]
    fn test_progress_percent() {
        let p = Progress {
            bytes_downloaded: 50,
            total_bytes: Some(200),
            state: TransferState::Downloading,
        };
        assert_eq!(p.percent(), Some(25.0));

        let unknown = Progress { total_bytes: None, ..p };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_user_agent_versions() {
        let mut ua = UserAgent::default();
        ua.set_engine_version("2.1");
        ua.set_browser_version("1.0.0");
        assert_eq!(
            ua.as_str(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Vostro/2.1 (KHTML, like Gecko) OriginBrowser/1.0.0"
        );
    }

    #[test]
    fn test_user_agent_missing_token_is_noop() {
        let mut ua = UserAgent::new("curl/8.0");
        ua.set_engine_version("9");
        assert_eq!(ua.as_str(), "curl/8.0");
    }

    #[test]
    fn test_settings_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{ "max_concurrent_downloads": 2 }"#).unwrap();
        assert_eq!(settings.max_concurrent_downloads, 2);
        assert_eq!(settings.connect_timeout_secs, 30);
        assert_eq!(settings.user_agent, UserAgent::default());
    }
}
