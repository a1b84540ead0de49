//! HTTP PUT of a single chunk to the datastore file endpoint

use crate::config::{AuthConfig, EndpointConfig};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{PusherError, Result};
use crate::upload::source::ChunkReader;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use url::Url;

#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Sends exactly `len` bytes from `body` to `url`.
    async fn put_chunk(&self, url: &Url, body: ChunkReader, len: u64) -> Result<()>;
}

/// Builds the HTTP client shared by the transport and the datastore client.
pub fn build_http_client(endpoint: &EndpointConfig, request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(endpoint.skip_tls)
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("ova-pusher/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PusherError::Config(format!("Failed to build HTTP client: {}", e)))
}

pub struct HttpChunkTransport {
    client: Client,
    auth: AuthConfig,
    timeout: Duration,
}

impl HttpChunkTransport {
    pub fn new(client: Client, auth: AuthConfig, timeout: Duration) -> Self {
        Self {
            client,
            auth,
            timeout,
        }
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn put_chunk(&self, url: &Url, body: ChunkReader, len: u64) -> Result<()> {
        let body = Body::wrap_stream(ReaderStream::new(body));

        let response = self
            .client
            .put(url.clone())
            .basic_auth(&self.auth.username, self.auth.password.as_deref())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "chunk upload"))?;

        let status = response.status();
        if HttpErrorHandler::is_accepted(status) {
            tracing::trace!(status = status.as_u16(), bytes = len, "chunk accepted");
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(HttpErrorHandler::handle_upload_error(status, &error_text, "upload"))
    }
}
