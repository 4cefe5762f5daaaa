//! Shared HTTP response handling for provider, chain and signer clients.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{classify_http, ProviderError, ProviderResult};

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Decode a JSON body, classifying non-2xx responses.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let retry = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_http(status, &body, retry));
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::unknown(format!("malformed response ({e}): {}", truncate(&body))))
}

fn truncate(body: &str) -> &str {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
