//! Shared HTTP executor.
//!
//! One `reqwest::Client` serves every provider instance; it supports
//! concurrent in-flight calls and carries the configured total timeout.

use std::time::Duration;

use crate::error::{ClientError, ProviderError};
use crate::providers::WireRequest;

#[derive(Clone)]
pub struct HttpExecutor {
    http: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Perform one wire request and return the decoded JSON body.
    pub async fn execute(&self, request: WireRequest) -> Result<serde_json::Value, ProviderError> {
        let mut builder = self.http.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        let response = builder.json(&request.body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_response(status.as_u16(), &body));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ProviderError::Format {
            message: format!("response body is not valid JSON: {e}"),
        })
    }
}

/// Map a non-2xx response to a provider error, pulling a message out of
/// the common `{"error": {"message": ...}}` shape when present.
pub(crate) fn map_error_response(status: u16, body: &str) -> ProviderError {
    if status == 429 {
        return ProviderError::RateLimited;
    }

    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|e| e.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.to_string());

    ProviderError::UpstreamHttp { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_maps_to_rate_limited() {
        assert!(matches!(
            map_error_response(429, "slow down"),
            ProviderError::RateLimited
        ));
    }

    #[test]
    fn error_message_extracted_from_json_body() {
        let err = map_error_response(400, r#"{"error": {"message": "bad model"}}"#);
        match err {
            ProviderError::UpstreamHttp { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn opaque_body_carried_verbatim() {
        let err = map_error_response(502, "bad gateway");
        match err {
            ProviderError::UpstreamHttp { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
