//! Request queue for plain request/response fetches
//!
//! Host components that just want a document (not a managed download) push
//! a URL and a callback. A single background task drains the queue in order;
//! it sleeps on the channel and wakes as soon as something is enqueued.

use crate::engine::Transport;
use crate::error::DlgateError;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Status reported when the transport could not produce a response
pub const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// Outcome of one queued request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Invoked once with the response, on the queue's worker task
pub type ResponseCallback = Box<dyn FnOnce(FetchResponse) + Send>;

struct QueuedRequest {
    url: String,
    callback: Option<ResponseCallback>,
}

/// FIFO of fetch requests served by one worker task
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    worker: JoinHandle<()>,
}

impl RequestQueue {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    pub fn start(transport: Arc<dyn Transport>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedRequest>();

        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let response = fetch_one(transport.as_ref(), &request.url).await;
                debug!("Fetched {} -> {}", request.url, response.status);
                if let Some(callback) = request.callback {
                    callback(response);
                }
            }
            debug!("Request queue drained and closed");
        });

        Self { tx, worker }
    }

    /// Queue a request; `callback` runs on the worker once it completes
    pub fn enqueue<F>(&self, url: impl Into<String>, callback: F) -> Result<(), DlgateError>
    where
        F: FnOnce(FetchResponse) + Send + 'static,
    {
        self.push(url.into(), Some(Box::new(callback)))
    }

    /// Queue a request nobody waits for
    pub fn enqueue_detached(&self, url: impl Into<String>) -> Result<(), DlgateError> {
        self.push(url.into(), None)
    }

    /// Queue a request and wait for its response
    pub async fn fetch(&self, url: impl Into<String>) -> Result<FetchResponse, DlgateError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(url, move |response| {
            let _ = tx.send(response);
        })?;
        rx.await.map_err(|_| DlgateError::QueueClosed)
    }

    /// Stop accepting requests, finish the queued ones, then stop the worker
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("Request queue worker ended abnormally: {}", e);
        }
    }

    fn push(&self, url: String, callback: Option<ResponseCallback>) -> Result<(), DlgateError> {
        self.tx
            .send(QueuedRequest { url, callback })
            .map_err(|_| DlgateError::QueueClosed)
    }
}

async fn fetch_one(transport: &dyn Transport, url: &str) -> FetchResponse {
    match read_document(transport, url).await {
        Ok((status, body)) => FetchResponse {
            status,
            content: Some(String::from_utf8_lossy(&body).into_owned()),
            error: None,
        },
        Err(e) => FetchResponse {
            status: e.status().unwrap_or(TRANSPORT_FAILURE_STATUS),
            content: None,
            error: Some(e.to_string()),
        },
    }
}

async fn read_document(transport: &dyn Transport, url: &str) -> Result<(u16, Vec<u8>), DlgateError> {
    let response = transport.get(url).await?;
    let status = response.status;
    let body = response
        .body
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok((status, body))
}
