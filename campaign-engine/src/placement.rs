//! Call placement client
//!
//! [`CallPlacement`] is the seam to the external voice service. The runner
//! uses [`HttpCallPlacement`]; tests plug in recording fakes.

use async_trait::async_trait;
use serde_json::Value;
use shared_types::{CallRequest, CallResponse};
use std::time::Duration;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait CallPlacement: Send + Sync + 'static {
    async fn place_call(&self, request: &CallRequest) -> Result<CallResponse, PlacementError>;
}

#[derive(Debug, Clone)]
pub struct HttpPlacementConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// JSON-over-HTTP call placement
#[derive(Debug, Clone)]
pub struct HttpCallPlacement {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpCallPlacement {
    pub fn new(config: HttpPlacementConfig) -> Result<Self, PlacementError> {
        let url = config.url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PlacementError::Validation(format!(
                "call api url must start with http:// or https://: {url}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlacementError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: url.to_string(),
            api_key: config
                .api_key
                .filter(|key| !key.trim().is_empty()),
        })
    }
}

#[async_trait]
impl CallPlacement for HttpCallPlacement {
    async fn place_call(&self, request: &CallRequest) -> Result<CallResponse, PlacementError> {
        let mut builder = self.http.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PlacementError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PlacementError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(PlacementError::Rejected {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| format!("call service returned {status}")),
            });
        }

        parse_call_response(&body)
    }
}

/// Pull a human-readable message out of an error body.
/// Accepts `{"error": ".."}`, `{"message": ".."}` and `{"error": {"message": ".."}}`.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = match value.get("error") {
        Some(Value::String(message)) => Some(message.as_str()),
        Some(Value::Object(inner)) => inner.get("message").and_then(Value::as_str),
        _ => None,
    }
    .or_else(|| value.get("message").and_then(Value::as_str))?;

    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

fn parse_call_response(body: &str) -> Result<CallResponse, PlacementError> {
    let response: CallResponse = serde_json::from_str(body)
        .map_err(|e| PlacementError::InvalidResponse(format!("{e}: {body}")))?;
    if response.call_id.trim().is_empty() {
        return Err(PlacementError::InvalidResponse(
            "call service returned an empty call_id".to_string(),
        ));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":"number blocked"}"#).as_deref(),
            Some("number blocked")
        );
        assert_eq!(
            error_message(r#"{"message":"agent not found"}"#).as_deref(),
            Some("agent not found")
        );
        assert_eq!(
            error_message(r#"{"error":{"message":"quota exceeded","code":429}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(error_message("<html>bad gateway</html>"), None);
        assert_eq!(error_message(r#"{"error":"  "}"#), None);
    }

    #[test]
    fn test_parse_call_response() {
        let ok = parse_call_response(r#"{"call_id":"call_123","extra":true}"#).unwrap();
        assert_eq!(ok.call_id, "call_123");

        assert!(matches!(
            parse_call_response(r#"{"status":"queued"}"#),
            Err(PlacementError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_call_response(r#"{"call_id":""}"#),
            Err(PlacementError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_rejected_display_carries_message() {
        let err = PlacementError::Rejected {
            status: 422,
            message: "invalid to_number".to_string(),
        };
        assert_eq!(err.to_string(), "invalid to_number (HTTP 422)");
    }

    #[test]
    fn test_new_rejects_non_http_url() {
        let err = HttpCallPlacement::new(HttpPlacementConfig {
            url: "ftp://calls.local".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap_err();
        assert!(matches!(err, PlacementError::Validation(_)));
    }
}
