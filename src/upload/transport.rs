//! HTTP transport to the remote collector, behind a trait so the upload
//! logic can be exercised without a network.

use async_trait::async_trait;
use reqwest::{multipart, Client};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::heartbeat::HeartbeatReport;

/// Multipart field carrying the daily CSV file
pub const FIELD_CSV: &str = "csv";
/// Multipart field carrying each image (repeated)
pub const FIELD_IMAGES: &str = "images";
/// Multipart field carrying the log excerpt
pub const FIELD_LOG: &str = "log";

/// One file in an upload batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub field: &'static str,
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Everything sent in a single POST
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPayload {
    pub parts: Vec<PayloadPart>,
}

impl BatchPayload {
    pub fn count(&self, field: &str) -> usize {
        self.parts.iter().filter(|p| p.field == field).count()
    }

    pub fn total_bytes(&self) -> usize {
        self.parts.iter().map(|p| p.bytes.len()).sum()
    }
}

/// Status and body of the collector's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// Any 2xx acknowledges the whole batch
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends batches and heartbeats to the collector
///
/// `Err` means the request never got a reply (connection refused, DNS,
/// timeout). A reply with any status is `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send_batch(&self, payload: &BatchPayload) -> Result<TransportResponse>;

    async fn send_heartbeat(&self, report: &HeartbeatReport) -> Result<TransportResponse>;
}

/// `reqwest` implementation with bearer-token auth and a fixed timeout
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    upload_url: String,
    heartbeat_url: Option<String>,
    auth_token: String,
}

impl ReqwestTransport {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.upload.request_timeout())
            .user_agent(concat!("sensor-spooler/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            upload_url: config.upload.server_url.clone(),
            heartbeat_url: config
                .heartbeat
                .enabled
                .then(|| config.heartbeat.url.clone()),
            auth_token: config.upload.auth_token.clone(),
        })
    }

    async fn into_response(response: reqwest::Response) -> TransportResponse {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        TransportResponse { status, body }
    }
}

#[async_trait]
impl UploadTransport for ReqwestTransport {
    async fn send_batch(&self, payload: &BatchPayload) -> Result<TransportResponse> {
        let mut form = multipart::Form::new();
        for part in &payload.parts {
            form = form.part(
                part.field,
                multipart::Part::bytes(part.bytes.clone())
                    .file_name(part.file_name.clone())
                    .mime_str(part.mime)?,
            );
        }

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.auth_token)
            .multipart(form)
            .send()
            .await?;

        let reply = Self::into_response(response).await;
        debug!("POST {} -> {}", self.upload_url, reply.status);
        Ok(reply)
    }

    async fn send_heartbeat(&self, report: &HeartbeatReport) -> Result<TransportResponse> {
        let Some(url) = &self.heartbeat_url else {
            return Ok(TransportResponse {
                status: 204,
                body: String::new(),
            });
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(report)
            .send()
            .await?;

        let reply = Self::into_response(response).await;
        debug!("POST {} -> {}", url, reply.status);
        Ok(reply)
    }
}
