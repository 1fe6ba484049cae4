//! HTTP Transport

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

use crate::{ForwardError, ForwardRequest};

/// Sends forward requests to downstream targets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request. Network failures and non-2xx responses are errors.
    async fn send(&self, request: &ForwardRequest) -> Result<(), ForwardError>;
}

/// reqwest-backed transport with a fixed per-request timeout
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Http(format!("Failed to build client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ForwardRequest) -> Result<(), ForwardError> {
        let builder = match request {
            ForwardRequest::Post { url, form } => self
                .client
                .post(url.as_str())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form.clone()),
            ForwardRequest::Get { url } => self.client.get(url.as_str()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ForwardError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Forwarded to {} ({})", request.url(), status);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(ForwardError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
