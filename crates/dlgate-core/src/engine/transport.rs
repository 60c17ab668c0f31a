//! Transport seam between the engine and the network
//!
//! The engine only needs three things from the network: a request that
//! completes once headers arrive, an optional declared content length, and a
//! byte stream for the body. Pooling, redirects and TLS are the transport's
//! business.

use crate::error::DlgateError;
use async_trait::async_trait;
use bytes::Bytes;
use dlgate_types::Settings;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Body of a response, yielded in whatever pieces the network delivers
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Response at headers-received time; the body has not been read yet
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests on behalf of transfer units. Shared by all of them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, DlgateError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, DlgateError> {
        let mut builder = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs));

        if let Some(secs) = settings.read_timeout_secs {
            builder = builder.read_timeout(Duration::from_secs(secs));
        }

        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, DlgateError> {
        let parsed = url::Url::parse(url).map_err(|_| DlgateError::InvalidUrl(url.to_string()))?;

        // `send` resolves at headers-received time; the body stays on the wire.
        let response = self.client.get(parsed).send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        debug!("GET {} -> {} (content-length: {:?})", url, status, content_length);

        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        Ok(TransportResponse {
            status,
            content_length,
            body,
        })
    }
}
