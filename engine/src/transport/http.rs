//! HTTP Request Sender
//!
//! Implements `RequestSender` over `reqwest`. Each HTTP reply is converted into
//! the controller envelope:
//!
//! - `RETURN_CODE`: the HTTP status code
//! - `MESSAGE`: `"OK"` for any 2xx status, the canonical reason phrase otherwise
//! - `DATA`: the JSON body, the raw text if it is not JSON, `{}` if empty
//! - `ERROR`: the body text (or reason phrase) for 4xx and 5xx replies

use async_trait::async_trait;
use reqwest::{Client, Method};
use sdk::{OperationRequest, ReconcileError, RequestSender, ResponseEnvelope, Verb};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::classify::MESSAGE_OK;

/// Sends controller operations over HTTP
#[derive(Debug, Clone)]
pub struct HttpSender {
    /// Base URL of the controller API (e.g., "https://controller.example/api/v1")
    base_url: String,

    /// HTTP client for API requests
    client: Client,
}

impl HttpSender {
    /// Create a new HTTP sender
    ///
    /// # Arguments
    /// * `base_url` - Base URL that request paths are appended to
    /// * `request_timeout` - Limit for a single HTTP call; retries are the coordinator's job
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ReconcileError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReconcileError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &OperationRequest) -> Result<ResponseEnvelope, ReconcileError> {
        let url = self.url_for(&request.path);
        let method = match request.verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
        };

        debug!("HTTP {} {}", request.verb, url);

        let mut builder = self.client.request(method, &url);
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReconcileError::Network(format!("Request to {} timed out", url))
            } else if e.is_connect() {
                ReconcileError::Network(format!("Cannot connect to controller at {}", url))
            } else {
                ReconcileError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReconcileError::Network(format!("Failed to read response body: {}", e)))?;

        Ok(envelope_from_http(
            status.as_u16(),
            status.canonical_reason(),
            &body,
        ))
    }
}

/// Build the controller envelope for one HTTP reply
pub fn envelope_from_http(status: u16, reason: Option<&str>, body: &str) -> ResponseEnvelope {
    let message = if (200..300).contains(&status) {
        MESSAGE_OK.to_string()
    } else {
        reason.unwrap_or("Unknown").to_string()
    };

    let data = if body.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    };

    let error = if status >= 400 {
        let text = if body.trim().is_empty() {
            message.clone()
        } else {
            body.to_string()
        };
        Some(Value::String(text))
    } else {
        None
    };

    ResponseEnvelope {
        return_code: i64::from(status),
        message: Some(message),
        data,
        error,
    }
}
