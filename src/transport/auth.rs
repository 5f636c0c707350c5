//! Bearer-token transport with a single refresh-and-replay on 401.

use super::session::Session;
use super::{HttpMethod, RequestOptions, ResponseBody, Transport, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

/// Header carrying the caller's active role.
pub const ROLE_HEADER: &str = "X-AS-ROLE";

const REFRESH_PATH: &str = "/api/v2/auth/refresh";
const LOGIN_PATH: &str = "/api/v2/auth/login";

/// A fully resolved HTTP request handed to a backend.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub include_credentials: bool,
    pub keepalive: bool,
}

impl HttpRequest {
    /// Last value for a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    /// A JSON response.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(
            status,
            Some("application/json".to_string()),
            body.to_string().into_bytes(),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, falling back to the raw text.
    fn error_body(&self) -> Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

/// Set `name`, replacing any earlier value regardless of case.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

/// Executes one HTTP request.
///
/// Header names in a request are unique. `include_credentials` selects
/// whether stored cookies are sent and stored. `keepalive` is advisory: a
/// backend may ignore it, since deliveries run as tasks detached from the page
/// lifecycle.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// The production [`Transport`].
pub struct AuthTransport<B> {
    base_url: Url,
    session: Arc<Session>,
    backend: B,
}

impl<B: HttpBackend> AuthTransport<B> {
    /// Create a transport resolving relative URLs against `base_url`.
    pub fn new(base_url: &str, session: Arc<Session>, backend: B) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url,
            session,
            backend,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchange credentials for an access token, storing it in the session.
    pub async fn login(&self, email: &str, password: &str) -> bool {
        let body = json!({ "email": email, "password": password });
        let stored = match self.auth_request(LOGIN_PATH, &body, false) {
            Ok(request) => self.store_token(self.backend.execute(request).await),
            Err(e) => {
                tracing::warn!(error = %e, "login request could not be built");
                false
            }
        };
        if !stored {
            self.session.clear();
        }
        stored
    }

    /// Obtain a fresh access token. Clears the session on failure.
    pub async fn refresh_access_token(&self) -> bool {
        let refreshed = match self.auth_request(REFRESH_PATH, &json!({}), true) {
            Ok(request) => self.store_token(self.backend.execute(request).await),
            Err(e) => {
                tracing::warn!(error = %e, "refresh request could not be built");
                false
            }
        };
        if !refreshed {
            self.session.clear();
        }
        refreshed
    }

    fn store_token(&self, result: Result<HttpResponse, TransportError>) -> bool {
        let response = match result {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::warn!(status = response.status, "auth endpoint rejected request");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "auth endpoint unreachable");
                return false;
            }
        };

        let token = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|body| body.get("accessToken")?.as_str().map(str::to_string));
        match token {
            Some(token) => {
                self.session.set_access_token(Some(token));
                true
            }
            None => {
                tracing::warn!("auth response carried no access token");
                false
            }
        }
    }

    fn auth_request(
        &self,
        path: &str,
        body: &Value,
        with_bearer: bool,
    ) -> Result<HttpRequest, TransportError> {
        let url = self.resolve(path)?;
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if with_bearer {
            if let Some(token) = self.session.access_token() {
                headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body.to_string().into_bytes()),
            include_credentials: true,
            keepalive: false,
        })
    }

    fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(url)
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))
    }

    fn build_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpRequest, TransportError> {
        let mut target = self.resolve(url)?;
        // The query is always the search params, so none clears it.
        target.set_query(None);
        if !options.search_params.is_empty() {
            target
                .query_pairs_mut()
                .extend_pairs(options.search_params.iter());
        }

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = self.session.access_token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        for (name, value) in &options.headers {
            set_header(&mut headers, name, value);
        }
        set_header(&mut headers, ROLE_HEADER, &self.session.role());

        let body = options
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        Ok(HttpRequest {
            method: options.method,
            url: target,
            headers,
            body,
            include_credentials: options.include_credentials,
            keepalive: options.keepalive,
        })
    }
}

#[async_trait]
impl<B: HttpBackend> Transport for AuthTransport<B> {
    async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError> {
        let mut may_refresh = options.retry;

        loop {
            // Rebuilt on replay so the refreshed token is attached.
            let request = self.build_request(url, &options)?;
            let response = self.backend.execute(request).await?;

            if response.status == 401 && may_refresh {
                tracing::debug!(
                    method = options.method.as_str(),
                    url,
                    "401 received, refreshing access token"
                );
                if !self.refresh_access_token().await {
                    return Err(TransportError::RefreshFailed);
                }
                may_refresh = false;
                continue;
            }

            if !response.is_success() {
                return Err(TransportError::Api {
                    status: response.status,
                    body: response.error_body(),
                });
            }

            let content_type = response.content_type.clone().unwrap_or_default();
            return ResponseBody::decode(&content_type, response.body);
        }
    }
}
