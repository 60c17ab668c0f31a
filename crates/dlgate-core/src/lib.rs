//! DLGate Core - Download Engine
//!
//! This crate runs many HTTP downloads at once under a concurrency cap,
//! with per-transfer pause, resume and cancel and progress reporting.
//!
//! ```no_run
//! use dlgate_core::{DownloadManager, StartRequest};
//! use dlgate_types::Settings;
//!
//! # async fn example() -> Result<(), dlgate_core::DlgateError> {
//! let manager = DownloadManager::new(&Settings::default())?;
//! let unit = manager
//!     .start(
//!         StartRequest::new("https://example.com/file.bin", "file.bin")
//!             .with_observer(|p| println!("{} bytes", p.bytes_downloaded)),
//!     )
//!     .await?;
//! println!("{} finished {}", unit.id(), unit.state());
//! # Ok(())
//! # }
//! ```

pub mod engine;
mod error;
mod request_queue;
mod settings;

pub use engine::{
    DownloadManager, HttpTransport, ProgressObserver, StartRequest, TransferResult, TransferUnit,
    Transport, TransportResponse, CHUNK_SIZE, DEFAULT_MAX_CONCURRENT,
};
pub use error::*;
pub use request_queue::*;
pub use settings::*;
