//! HTTP boundary for the gateway.
//!
//! The gateway only needs "send this request, give me status, headers and
//! body", so that is all [`HttpTransport`] exposes. Production code uses
//! [`ReqwestTransport`]; tests substitute a scripted implementation.

use std::time::Duration;

use reqwest::{Client, Method};
use thiserror::Error;

use super::types::FormPayload;

/// Headers sent with every request so responses are never served from a cache.
pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Already-serialized JSON bytes.
    Json(Vec<u8>),
    Form(FormPayload),
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Look up a request header by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Response headers with lowercase names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Look up a response header by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the server declared a JSON body.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures before a response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached or the connection dropped mid-exchange.
    #[error("network error: {0}")]
    Connect(String),

    /// The request could not be built (bad header, bad multipart part).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server answered, but the exchange could not be completed
    /// (redirect loop, undecodable body).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Protocol(err.to_string())
        }
    }
}

/// Trait abstracting the HTTP exchange for testability.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`reqwest`]-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.body(bytes.clone()),
            RequestBody::Form(form) => {
                let multipart = form
                    .to_multipart()
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                builder.multipart(multipart)
            }
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let body = resp.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
