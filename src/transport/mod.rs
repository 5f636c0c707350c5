//! Authenticated request transport.
//!
//! The logger only depends on the [`Transport`] trait. [`AuthTransport`] is
//! the production implementation: it attaches the session's bearer token and
//! role, refreshes once on 401, and decodes responses by content type.

pub mod auth;
pub mod session;

#[cfg(feature = "http")]
pub mod reqwest_backend;

pub use auth::{AuthTransport, HttpBackend, HttpRequest, HttpResponse, ROLE_HEADER};
pub use session::Session;

#[cfg(feature = "http")]
pub use reqwest_backend::ReqwestBackend;

use async_trait::async_trait;
use serde_json::Value;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

/// Options for a single [`Transport::request`] call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: HttpMethod,
    /// Extra headers; each replaces a default of the same name
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
    /// Whether a 401 may trigger one refresh and replay
    pub retry: bool,
    /// Send cookies with the request
    pub include_credentials: bool,
    /// Replaces the URL's query string; empty clears it
    pub search_params: Vec<(String, String)>,
    /// The request should outlive the page that issued it (advisory)
    pub keepalive: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            retry: true,
            include_credentials: false,
            search_params: Vec::new(),
            keepalive: false,
        }
    }
}

impl RequestOptions {
    /// A POST carrying `body` as JSON.
    pub fn post_json(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self) -> Self {
        self.include_credentials = true;
        self
    }

    pub fn with_keepalive(mut self) -> Self {
        self.keepalive = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_search_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.push((name.into(), value.into()));
        self
    }
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Blob { content_type: String, bytes: Vec<u8> },
    Text(String),
}

impl ResponseBody {
    /// Decode `bytes` according to `content_type`.
    pub fn decode(content_type: &str, bytes: Vec<u8>) -> Result<Self, TransportError> {
        if content_type.contains("application/json") {
            if bytes.is_empty() {
                return Ok(ResponseBody::Json(Value::Null));
            }
            return serde_json::from_slice(&bytes)
                .map(ResponseBody::Json)
                .map_err(|e| TransportError::Decode(e.to_string()));
        }
        if content_type.starts_with("image/") || content_type.contains("application/") {
            return Ok(ResponseBody::Blob {
                content_type: content_type.to_string(),
                bytes,
            });
        }
        Ok(ResponseBody::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Transport error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Connection or I/O failure
    #[error("network error: {0}")]
    Network(String),
    /// The token refresh after a 401 failed
    #[error("unauthorized: token refresh failed")]
    RefreshFailed,
    /// Non-2xx response, carrying the parsed body
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: Value },
    /// Request body could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Response body did not match its content type
    #[error("decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// An authenticated request executor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_by_content_type() {
        let json = ResponseBody::decode("application/json; charset=utf-8", b"{\"ok\":true}".to_vec())
            .unwrap();
        assert_eq!(json, ResponseBody::Json(json!({ "ok": true })));

        let blob = ResponseBody::decode("image/png", vec![0x89, 0x50]).unwrap();
        assert!(matches!(blob, ResponseBody::Blob { ref bytes, .. } if bytes.len() == 2));

        let pdf = ResponseBody::decode("application/pdf", vec![1]).unwrap();
        assert!(matches!(pdf, ResponseBody::Blob { .. }));

        let text = ResponseBody::decode("text/plain", b"pong".to_vec()).unwrap();
        assert_eq!(text, ResponseBody::Text("pong".to_string()));

        let empty = ResponseBody::decode("", Vec::new()).unwrap();
        assert_eq!(empty, ResponseBody::Text(String::new()));
    }

    #[test]
    fn test_malformed_json_is_a_decode_error() {
        let err = ResponseBody::decode("application/json", b"{nope".to_vec()).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn test_default_options_allow_retry() {
        let options = RequestOptions::default();
        assert!(options.retry);
        assert_eq!(options.method, HttpMethod::Get);

        let post = RequestOptions::post_json(json!({})).with_keepalive().with_credentials();
        assert_eq!(post.method, HttpMethod::Post);
        assert!(post.keepalive && post.include_credentials);
    }
}
