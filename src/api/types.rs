//! Request and response types for the SynergySphere backend API.

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

/// Message used when the server gives no `error` or `msg` field.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Request body variants accepted by the gateway.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// Sent as `multipart/form-data`; the boundary header is set by the transport.
    Form(FormPayload),
}

/// A single value inside a [`FormPayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

/// Multipart payload that can be replayed.
///
/// `reqwest::multipart::Form` is consumed on send, so the parts are kept here
/// and converted per attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormPayload {
    parts: Vec<FormPart>,
}

impl FormPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            value: FormValue::Text(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    ) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            value: FormValue::File {
                bytes,
                file_name,
                mime,
            },
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Build a fresh multipart form for one dispatch.
    pub fn to_multipart(&self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for part in &self.parts {
            form = match &part.value {
                FormValue::Text(text) => form.text(part.name.clone(), text.clone()),
                FormValue::File {
                    bytes,
                    file_name,
                    mime,
                } => {
                    let mut p = Part::bytes(bytes.clone());
                    if let Some(name) = file_name {
                        p = p.file_name(name.clone());
                    }
                    if let Some(mime) = mime {
                        p = p.mime_str(mime)?;
                    }
                    form.part(part.name.clone(), p)
                }
            };
        }
        Ok(form)
    }
}

/// One logical call through the gateway.
///
/// Cloned as-is when the call is replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Server-relative path, e.g. `/projects`.
    pub endpoint: String,
    pub method: Method,
    pub payload: Option<Payload>,
    /// Key toggled in the loading registry while the call is in flight.
    pub loading_key: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload: None,
            loading_key: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.payload = Some(Payload::Json(body));
        self
    }

    pub fn with_form(mut self, form: FormPayload) -> Self {
        self.payload = Some(Payload::Form(form));
        self
    }

    pub fn with_loading_key(mut self, key: impl Into<String>) -> Self {
        self.loading_key = Some(key.into());
        self
    }
}

/// Error body returned by the backend: `{"error": ...}` or `{"msg": ...}`.
#[derive(Debug, Default)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub msg: Option<String>,
}

impl ErrorBody {
    /// Read the error fields from an arbitrary JSON body; non-string fields are ignored.
    pub fn from_value(body: &Value) -> Self {
        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            error: field("error"),
            msg: field("msg"),
        }
    }

    /// Preferred human-readable message: `error`, then `msg`, then a generic fallback.
    pub fn message(&self) -> String {
        self.error
            .as_deref()
            .or(self.msg.as_deref())
            .unwrap_or(GENERIC_ERROR_MESSAGE)
            .to_string()
    }
}

/// Response from POST /auth/refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_body_prefers_error_field() {
        let body = json!({"error": "not found", "msg": "ignored"});
        assert_eq!(ErrorBody::from_value(&body).message(), "not found");
    }

    #[test]
    fn test_error_body_falls_back_to_msg() {
        let body = json!({"msg": "Token has expired"});
        assert_eq!(ErrorBody::from_value(&body).message(), "Token has expired");
    }

    #[test]
    fn test_error_body_generic_message() {
        assert_eq!(ErrorBody::from_value(&json!({})).message(), GENERIC_ERROR_MESSAGE);
        assert_eq!(
            ErrorBody::from_value(&json!({"error": {"code": 3}})).message(),
            GENERIC_ERROR_MESSAGE
        );
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::post("/projects")
            .with_json(json!({"name": "Alpha"}))
            .with_loading_key("create-project");
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.endpoint, "/projects");
        assert_eq!(req.loading_key.as_deref(), Some("create-project"));
        assert!(matches!(req.payload, Some(Payload::Json(_))));
    }

    #[test]
    fn test_form_payload_to_multipart() {
        let form = FormPayload::new()
            .text("description", "receipt")
            .file(
                "file",
                vec![1, 2, 3],
                Some("receipt.pdf".to_string()),
                Some("application/pdf".to_string()),
            );
        assert_eq!(form.parts().len(), 2);
        assert!(form.to_multipart().is_ok());
    }

    #[test]
    fn test_form_payload_rejects_bad_mime() {
        let form = FormPayload::new().file("file", vec![], None, Some("not a mime".to_string()));
        assert!(form.to_multipart().is_err());
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let resp: RefreshResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(resp.access_token, "abc");
        assert!(resp.refresh_token.is_none());
    }
}
