//! Outbound request plumbing shared by the token exchange and the gateway.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Vendor API responses are small JSON documents; anything past this is junk.
pub(crate) const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
pub enum HttpError {
    /// Request (send plus body read) exceeded its deadline
    #[error("Request timed out")]
    Timeout,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Status and fully-read body of a vendor response.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Send `request` and read the whole body, all under one `timeout`.
///
/// On timeout the in-flight request is dropped, which aborts it.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<RawResponse, HttpError> {
    let exchange = async {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        Ok::<_, HttpError>(RawResponse { status, body })
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| HttpError::Timeout)?
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, HttpError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(HttpError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(HttpError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Lossy, length-capped rendering of a response body for logs and errors.
pub(crate) fn body_snippet(body: &[u8]) -> String {
    const MAX_SNIPPET: usize = 512;
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_SNIPPET) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
