//! Minimal HTTP plumbing shared by the OpenAI-compatible embedding and
//! chat-completion providers.
//!
//! Status classification:
//! - 429 → [`ServiceError::RateLimit`]
//! - 401 / 403 → [`ServiceError::Auth`]
//! - 5xx, connect errors, timeouts → [`ServiceError::TransientNetwork`]
//! - other 4xx → [`ServiceError::InvalidInput`]
//! - 2xx with an undecodable body → [`ServiceError::InvalidResponse`]

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::ServiceError;

/// Longest slice of an error body kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// POST `body` to `{base_url}/{path}` and decode the JSON response.
    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ServiceError::InvalidResponse(e.to_string()));
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body_text))
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let message = format!("HTTP {}: {}", status, detail);
    match status.as_u16() {
        429 => ServiceError::RateLimit(message),
        401 | 403 => ServiceError::Auth(message),
        _ if status.is_server_error() => ServiceError::TransientNetwork(message),
        _ => ServiceError::InvalidInput(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "quota"),
            ServiceError::RateLimit(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ServiceError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            ServiceError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ServiceError::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "input too long"),
            ServiceError::InvalidInput(_)
        ));
    }

    #[test]
    fn error_body_is_truncated() {
        let long = "x".repeat(10_000);
        let err = classify_status(StatusCode::BAD_REQUEST, &long);
        assert!(err.to_string().len() < 1_000);
    }
}
