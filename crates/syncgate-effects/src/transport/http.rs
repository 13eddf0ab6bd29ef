//! HTTP transport over `reqwest`
//!
//! Relative request paths are resolved against the configured origin.
//! Failures before a status line is read map to transient
//! [`TransportError`] variants; any status (including 4xx/5xx) is a
//! successful exchange.

use std::time::Duration;

use async_trait::async_trait;
use syncgate_core::effects::TransportEffects;
use syncgate_core::{Body, GatewayRequest, GatewayResponse, Headers, Method, TransportError};
use tracing::{debug, warn};

/// Remote API client
#[derive(Debug, Clone)]
pub struct HttpTransportHandler {
    client: reqwest::Client,
    origin: Option<String>,
}

impl HttpTransportHandler {
    /// Create a transport resolving relative paths against `origin`
    pub fn new(origin: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Protocol {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            origin: origin.map(|o| o.trim_end_matches('/').to_string()),
        })
    }

    /// Absolute URL for `path`
    pub fn resolve(&self, path: &str) -> Result<String, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        match &self.origin {
            Some(origin) => Ok(format!("{origin}{path}")),
            None => Err(TransportError::Protocol {
                message: format!("relative path '{path}' with no origin configured"),
            }),
        }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(err: &reqwest::Error, timeout: Duration) -> TransportError {
        let message = err.to_string();
        if err.is_timeout() {
            TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            let lower = format!("{err:?}").to_ascii_lowercase();
            if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") {
                TransportError::Dns { message }
            } else {
                TransportError::ConnectionFailed { message }
            }
        } else if err.is_body() || err.is_decode() || err.is_builder() {
            TransportError::Protocol { message }
        } else {
            TransportError::ConnectionReset { message }
        }
    }
}

#[async_trait]
impl TransportEffects for HttpTransportHandler {
    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        let url = self.resolve(&request.url)?;

        let mut builder = self
            .client
            .request(Self::method(request.method), &url)
            .timeout(timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.to_bytes());
        }

        let response = builder.send().await.map_err(|e| {
            let err = Self::classify(&e, timeout);
            warn!(method = %request.method, url = %url, error = %err, "HTTP exchange failed");
            err
        })?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::classify(&e, timeout))?;

        debug!(method = %request.method, url = %url, status, "HTTP exchange completed");

        let body = Body::from_wire(bytes.to_vec(), headers.get("content-type"));
        let mut out = GatewayResponse::new(status, body);
        out.headers = headers;
        Ok(out)
    }
}
