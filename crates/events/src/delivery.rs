//! Single-attempt webhook POSTs.
//!
//! Retry and backoff live in the dispatcher, which owns the attempt
//! counter on the job record.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookClient
// ---------------------------------------------------------------------------

/// `Authorization` header value for a callback token. A token that already
/// carries the `Bearer ` scheme is sent unchanged.
pub fn authorization_value(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

/// Posts pre-serialized JSON bodies to callback URLs.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Execute a single POST request and check the response status.
    pub async fn post(
        &self,
        url: &str,
        auth_token: Option<&str>,
        body: Vec<u8>,
    ) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = auth_token {
            request = request.header(AUTHORIZATION, authorization_value(token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
