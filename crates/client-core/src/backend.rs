//! Backend services: token issuance, transfer, summary recovery
//!
//! [`BackendApi`] is the seam between the session layer and the HTTP backend.
//! [`HttpBackend`] talks to the real service:
//!
//! | Operation | Request | Success |
//! |---|---|---|
//! | [`issue_token`](BackendApi::issue_token) | `POST /get_token {room, identity}` | `{token}` |
//! | [`request_transfer`](BackendApi::request_transfer) | `POST /transfer {room, from_identity, to_identity, summary, transcript}` | `{token, summary?, audio_url?}` |
//! | [`fetch_summary`](BackendApi::fetch_summary) | `GET /get_summary/{room}` | `{summary?}` |
//!
//! A non-2xx answer, or one without a token, is a [`ClientError::Backend`]
//! carrying the server's `detail` verbatim. The summary lookup is lenient: a
//! non-OK answer or a missing field just means there is no stored summary.
//! Timeouts come from the HTTP client configuration only.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::client::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transfer::{TransferOutcome, TransferRequest, NO_TOKEN_RETURNED};

/// Backend operations the session layer depends on
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Get a room access credential for `identity`
    async fn issue_token(&self, room: &str, identity: &str) -> ClientResult<String>;

    /// Ask for a credential for the transfer target plus a context summary
    async fn request_transfer(&self, request: &TransferRequest) -> ClientResult<TransferOutcome>;

    /// Look up the summary stored for `room`, if any
    async fn fetch_summary(&self, room: &str) -> ClientResult<Option<String>>;
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    room: &'a str,
    identity: &'a str,
}

/// HTTP implementation of [`BackendApi`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend client for `base_url` with default HTTP settings
    pub fn new(base_url: &str) -> ClientResult<Self> {
        Self::from_config(&ClientConfig::default().with_backend_url(base_url))
    }

    /// Create a backend client from the client configuration
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let mut base_url = Url::parse(&config.backend_url).map_err(|e| {
            ClientError::configuration(format!("invalid backend url {}: {}", config.backend_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::configuration(format!(
                "backend url {} cannot be used as a base",
                config.backend_url
            )));
        }
        // Joining relative paths must not drop the last path segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::configuration("backend url cannot be used as a base"))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> ClientResult<(StatusCode, Value)> {
        let url = self.endpoint(segments)?;
        debug!(%url, "backend request");
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Ok((status, parse_body(&text)))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn issue_token(&self, room: &str, identity: &str) -> ClientResult<String> {
        let (status, body) = self.post_json(&["get_token"], &TokenRequest { room, identity }).await?;

        match string_field(&body, "token") {
            Some(token) if status.is_success() => {
                info!(room, identity, "access token issued");
                Ok(token)
            }
            _ => Err(error_from_response(status, &body)),
        }
    }

    async fn request_transfer(&self, request: &TransferRequest) -> ClientResult<TransferOutcome> {
        let (status, body) = self.post_json(&["transfer"], request).await?;

        match string_field(&body, "token") {
            Some(token) if status.is_success() => Ok(TransferOutcome {
                token,
                summary: string_field(&body, "summary"),
                audio_url: string_field(&body, "audio_url"),
            }),
            _ => Err(error_from_response(status, &body)),
        }
    }

    async fn fetch_summary(&self, room: &str) -> ClientResult<Option<String>> {
        let url = self.endpoint(&["get_summary", room])?;
        debug!(%url, "backend request");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            debug!(room, %status, "no stored summary");
            return Ok(None);
        }
        let text = resp.text().await?;
        Ok(string_field(&parse_body(&text), "summary"))
    }
}

fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or(Value::Null)
}

/// Non-empty string field of a JSON object
fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Server-provided `detail`: strings verbatim, anything else rendered as JSON
fn error_detail(body: &Value) -> Option<String> {
    match body.get("detail") {
        None | Some(Value::Null) => None,
        Some(Value::String(detail)) if detail.is_empty() => None,
        Some(Value::String(detail)) => Some(detail.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn error_from_response(status: StatusCode, body: &Value) -> ClientError {
    let detail = error_detail(body).unwrap_or_else(|| NO_TOKEN_RETURNED.to_string());
    ClientError::backend(Some(status.as_u16()), detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detail_extraction() {
        assert_eq!(error_detail(&json!({"detail": "Target agent not found"})).as_deref(), Some("Target agent not found"));
        assert_eq!(
            error_detail(&json!({"detail": [{"loc": ["body", "room"], "msg": "field required"}]})).as_deref(),
            Some(r#"[{"loc":["body","room"],"msg":"field required"}]"#)
        );
        assert_eq!(error_detail(&json!({"detail": null})), None);
        assert_eq!(error_detail(&Value::Null), None);
    }

    #[test]
    fn test_missing_detail_uses_default_message() {
        let err = error_from_response(StatusCode::OK, &json!({}));
        assert_eq!(err, ClientError::backend(Some(200), "No token returned from backend"));
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let body = json!({"token": "t1", "summary": "", "audio_url": null});
        assert_eq!(string_field(&body, "token").as_deref(), Some("t1"));
        assert_eq!(string_field(&body, "summary"), None);
        assert_eq!(string_field(&body, "audio_url"), None);
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let backend = HttpBackend::new("http://localhost:8000/api").unwrap();
        assert_eq!(backend.endpoint(&["get_token"]).unwrap().as_str(), "http://localhost:8000/api/get_token");

        let backend = HttpBackend::new("http://localhost:8000").unwrap();
        assert_eq!(
            backend.endpoint(&["get_summary", "room 1/a"]).unwrap().as_str(),
            "http://localhost:8000/get_summary/room%201%2Fa"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpBackend::new("not a url").unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }
}
