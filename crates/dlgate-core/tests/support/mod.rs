//! Shared helpers for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dlgate_core::{DlgateError, Transport, TransportResponse};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Deterministic body pattern so written files can be compared byte for byte
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// In-process transport with scripted bodies.
///
/// Each body is yielded in `piece`-sized pieces. With a gate, every piece
/// waits for one permit, so a test decides exactly when data flows. With a
/// delay, every piece sleeps first.
#[derive(Clone)]
pub struct ScriptedTransport {
    body_len: usize,
    piece: usize,
    declare_length: bool,
    status: u16,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    gets: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(body_len: usize) -> Self {
        Self {
            body_len,
            piece: 4096,
            declare_length: true,
            status: 200,
            delay: None,
            gate: None,
            gets: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_length(mut self) -> Self {
        self.declare_length = false;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of requests issued so far
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Highest number of bodies that were open at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter when the body stream is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, _url: &str) -> Result<TransportResponse, DlgateError> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());

        let pieces: Vec<Bytes> = body_of(self.body_len)
            .chunks(self.piece)
            .map(Bytes::copy_from_slice)
            .collect();
        let delay = self.delay;
        let gate = self.gate.clone();

        let body = futures::stream::unfold(
            (pieces.into_iter(), guard),
            move |(mut pieces, guard)| {
                let gate = gate.clone();
                async move {
                    let piece = pieces.next()?;
                    if let Some(gate) = gate {
                        gate.acquire().await.ok()?.forget();
                    }
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Some((Ok::<_, std::io::Error>(piece), (pieces, guard)))
                }
            },
        )
        .boxed();

        Ok(TransportResponse {
            status: self.status,
            content_length: self.declare_length.then_some(self.body_len as u64),
            body,
        })
    }
}
