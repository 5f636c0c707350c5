//! reqwest-backed [`HttpBackend`].

use super::auth::{HttpBackend, HttpRequest, HttpResponse};
use super::{HttpMethod, TransportError};
use async_trait::async_trait;

/// HTTP backend over `reqwest`.
///
/// Requests that include credentials go through a client with a cookie store,
/// so they carry the session cookies; the rest use a client without one.
#[derive(Clone)]
pub struct ReqwestBackend {
    credentialed: reqwest::Client,
    anonymous: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, TransportError> {
        let build = |cookies: bool| {
            reqwest::Client::builder()
                .cookie_store(cookies)
                .build()
                .map_err(|e| TransportError::Network(format!("failed to create HTTP client: {e}")))
        };
        Ok(Self {
            credentialed: build(true)?,
            anonymous: build(false)?,
        })
    }

    fn client(&self, include_credentials: bool) -> &reqwest::Client {
        if include_credentials {
            &self.credentialed
        } else {
            &self.anonymous
        }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        // keepalive is implicit: delivery tasks are detached from the logger.
        let mut builder = self
            .client(request.include_credentials)
            .request(method(request.method), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?
            .to_vec();

        Ok(HttpResponse::new(status, content_type, body))
    }
}
