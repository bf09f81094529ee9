//! Error taxonomy for gateway calls and the single place where responses
//! are classified.
//!
//! All matching rules (expiry messages, content types, status ranges) live in
//! [`classify`] so callers never compare message strings themselves.

use serde_json::{json, Value};
use thiserror::Error;

use super::auth::TokenStoreError;
use super::transport::{HttpResponse, TransportError};
use super::types::ErrorBody;

/// Message carried by [`ApiError::Connectivity`].
pub const CONNECTIVITY_MESSAGE: &str =
    "Unable to connect to the server. Please check your internet connection.";

/// Server message fragment that marks an expired access token (lowercase).
const TOKEN_EXPIRED_MARKER: &str = "token has expired";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response; `message` is the server-provided text.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// The access token expired and could not be refreshed.
    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("{}", CONNECTIVITY_MESSAGE)]
    Connectivity(String),

    #[error("The request timed out. Please try again.")]
    Timeout,

    #[error("Malformed response (status {status}): {reason}")]
    MalformedResponse { status: u16, reason: String },

    #[error("Token storage failed: {0}")]
    Storage(#[from] TokenStoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server answered but the exchange broke down (e.g. a redirect loop).
    #[error("Unexpected response from the server: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Whether the failure means the server was unreachable.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Connectivity(_))
    }

    /// HTTP status of the response that caused the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::MalformedResponse { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ApiError::Timeout,
            TransportError::Connect(detail) => ApiError::Connectivity(detail),
            TransportError::InvalidRequest(detail) => ApiError::InvalidRequest(detail),
            TransportError::Protocol(detail) => ApiError::Protocol(detail),
        }
    }
}

/// Result of classifying one HTTP response.
#[derive(Debug)]
pub enum Outcome {
    Success(Value),
    /// 401 whose message says the access token expired.
    TokenExpired,
    Failure(ApiError),
}

impl Outcome {
    /// Collapse into a result, treating an unresolved expiry as a dead session.
    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::TokenExpired => Err(ApiError::SessionExpired),
            Outcome::Failure(err) => Err(err),
        }
    }
}

/// Classify a response into success, token expiry, or a typed failure.
///
/// - Bodies are parsed as JSON only when the server declares a JSON content
///   type. An empty 2xx body resolves to `null`.
/// - A 2xx body that is not JSON is a [`ApiError::MalformedResponse`].
/// - A non-2xx body that is not JSON is replaced by a synthesized error
///   payload carrying the status.
pub fn classify(response: &HttpResponse) -> Outcome {
    let status = response.status;
    let success = response.is_success();

    let body = if success && response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else if response.is_json() {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => value,
            Err(e) if success => {
                return Outcome::Failure(ApiError::MalformedResponse {
                    status,
                    reason: format!("invalid JSON body: {}", e),
                });
            }
            Err(_) => synthesized_error(status),
        }
    } else if success {
        return Outcome::Failure(ApiError::MalformedResponse {
            status,
            reason: format!(
                "expected JSON, got {}",
                response.content_type().unwrap_or("no content type")
            ),
        });
    } else {
        synthesized_error(status)
    };

    if status == 401 && is_token_expired(&body) {
        return Outcome::TokenExpired;
    }

    if success {
        Outcome::Success(body)
    } else {
        Outcome::Failure(ApiError::Server {
            status,
            message: ErrorBody::from_value(&body).message(),
        })
    }
}

fn synthesized_error(status: u16) -> Value {
    json!({ "error": format!("Request failed with status {}", status) })
}

/// Whether a 401 body reports an expired access token.
pub fn is_token_expired(body: &Value) -> bool {
    let fields = ErrorBody::from_value(body);
    [fields.error, fields.msg]
        .iter()
        .flatten()
        .any(|m| m.to_lowercase().contains(TOKEN_EXPIRED_MARKER))
}
