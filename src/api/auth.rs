//! Token storage and the refresh collaborator.
//!
//! Access and refresh tokens are kept in the system keychain via the `keyring`
//! crate. The gateway only reads the access token; writing it is the job of
//! the login flow and of [`HttpTokenRefresher`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use keyring::Entry;
use reqwest::Method;
use thiserror::Error;

use super::transport::{HttpRequest, HttpTransport, RequestBody, NO_CACHE_HEADERS};
use super::types::RefreshResponse;

/// Keychain service name for stored credentials.
pub const SERVICE_NAME: &str = "com.synergysphere.client";

/// Fixed key holding the bearer access token.
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Fixed key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Endpoint that exchanges a refresh token for a new access token.
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("Token store operation failed: {0}")]
    OperationFailed(String),
}

impl From<keyring::Error> for TokenStoreError {
    fn from(err: keyring::Error) -> Self {
        TokenStoreError::OperationFailed(err.to_string())
    }
}

/// Persistent client storage for credentials.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Result<Option<String>, TokenStoreError>;
    fn refresh_token(&self) -> Result<Option<String>, TokenStoreError>;
    fn store_access_token(&self, token: &str) -> Result<(), TokenStoreError>;
    fn store_refresh_token(&self, token: &str) -> Result<(), TokenStoreError>;
    /// Idempotent: succeeds when nothing is stored.
    fn delete_refresh_token(&self) -> Result<(), TokenStoreError>;
    /// Remove both tokens (logout). Idempotent.
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// Keychain-backed [`TokenStore`].
#[derive(Debug, Clone)]
pub struct KeychainTokenStore {
    service: String,
}

impl Default for KeychainTokenStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeychainTokenStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TokenStoreError::from(e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), TokenStoreError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(TokenStoreError::from(e)),
        }
    }
}

impl TokenStore for KeychainTokenStore {
    fn access_token(&self) -> Result<Option<String>, TokenStoreError> {
        self.read(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>, TokenStoreError> {
        self.read(REFRESH_TOKEN_KEY)
    }

    fn store_access_token(&self, token: &str) -> Result<(), TokenStoreError> {
        self.write(ACCESS_TOKEN_KEY, token)
    }

    fn store_refresh_token(&self, token: &str) -> Result<(), TokenStoreError> {
        self.write(REFRESH_TOKEN_KEY, token)
    }

    fn delete_refresh_token(&self) -> Result<(), TokenStoreError> {
        self.delete(REFRESH_TOKEN_KEY)
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        self.delete(ACCESS_TOKEN_KEY)?;
        self.delete(REFRESH_TOKEN_KEY)
    }
}

/// In-process [`TokenStore`]; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<&'static str, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(t) = access {
                entries.insert(ACCESS_TOKEN_KEY, t.to_string());
            }
            if let Some(t) = refresh {
                entries.insert(REFRESH_TOKEN_KEY, t.to_string());
            }
        }
        store
    }

    fn get(&self, key: &'static str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &'static str, value: Option<&str>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => {
                entries.insert(key, v.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Result<Option<String>, TokenStoreError> {
        Ok(self.get(ACCESS_TOKEN_KEY))
    }

    fn refresh_token(&self) -> Result<Option<String>, TokenStoreError> {
        Ok(self.get(REFRESH_TOKEN_KEY))
    }

    fn store_access_token(&self, token: &str) -> Result<(), TokenStoreError> {
        self.set(ACCESS_TOKEN_KEY, Some(token));
        Ok(())
    }

    fn store_refresh_token(&self, token: &str) -> Result<(), TokenStoreError> {
        self.set(REFRESH_TOKEN_KEY, Some(token));
        Ok(())
    }

    fn delete_refresh_token(&self) -> Result<(), TokenStoreError> {
        self.set(REFRESH_TOKEN_KEY, None);
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        self.set(ACCESS_TOKEN_KEY, None);
        self.set(REFRESH_TOKEN_KEY, None);
        Ok(())
    }
}

/// The authentication collaborator's refresh operation.
#[allow(async_fn_in_trait)]
pub trait TokenRefresher {
    /// Try to obtain a new access token. Returns `true` on success.
    async fn refresh(&self) -> bool;
}

/// Refreshes the access token via `POST /auth/refresh`.
///
/// The stored refresh token is sent as the bearer credential. On success the
/// new access token (and a rotated refresh token, if the server returns one)
/// is written back to the store.
pub struct HttpTokenRefresher<T, S> {
    transport: T,
    tokens: Arc<S>,
    base_url: String,
}

impl<T: HttpTransport, S: TokenStore> HttpTokenRefresher<T, S> {
    pub fn new(transport: T, tokens: Arc<S>, base_url: &str) -> Self {
        Self {
            transport,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl<T: HttpTransport, S: TokenStore> TokenRefresher for HttpTokenRefresher<T, S> {
    async fn refresh(&self) -> bool {
        let refresh_token = match self.tokens.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                log::info!("No stored refresh token, refresh skipped");
                return false;
            }
            Err(e) => {
                log::warn!("Failed to read refresh token: {}", e);
                return false;
            }
        };

        let mut headers: Vec<(String, String)> = NO_CACHE_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        headers.push((
            "Authorization".to_string(),
            format!("Bearer {}", refresh_token),
        ));

        let request = HttpRequest {
            method: Method::POST,
            url: format!("{}{}", self.base_url, REFRESH_ENDPOINT),
            headers,
            body: RequestBody::Empty,
        };

        let resp = match self.transport.send(&request).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Refresh request failed: {}", e);
                return false;
            }
        };

        if resp.status == 401 {
            log::info!("Refresh token rejected, clearing stored refresh token");
            if let Err(e) = self.tokens.delete_refresh_token() {
                log::warn!("Failed to delete refresh token: {}", e);
            }
            return false;
        }

        if !resp.is_success() {
            log::warn!("Refresh failed with status {}", resp.status);
            return false;
        }

        let refreshed: RefreshResponse = match serde_json::from_slice(&resp.body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Failed to parse refresh response: {}", e);
                return false;
            }
        };

        if let Err(e) = self.tokens.store_access_token(&refreshed.access_token) {
            log::warn!("Failed to store refreshed access token: {}", e);
            return false;
        }
        if let Some(ref rotated) = refreshed.refresh_token {
            if let Err(e) = self.tokens.store_refresh_token(rotated) {
                log::warn!("Failed to store rotated refresh token: {}", e);
            }
        }

        log::info!("Access token refreshed");
        true
    }
}

/// Extract the `sub` claim from a JWT without verifying it.
///
/// Numeric subjects (flask-jwt-extended identities are often user ids) are
/// returned in their decimal form.
pub fn token_subject(token: &str) -> Result<String, String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid JWT format".to_string());
    }

    let payload = parts[1].trim_end_matches('=');
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| format!("Failed to decode JWT payload: {}", e))?;

    let json: serde_json::Value = serde_json::from_slice(&decoded)
        .map_err(|e| format!("Failed to parse JWT payload: {}", e))?;

    match &json["sub"] {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err("JWT payload missing 'sub' claim".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::{HttpResponse, TransportError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport returning canned responses and recording what it was sent.
    struct CannedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        sent: Mutex<Vec<HttpRequest>>,
        calls: AtomicU32,
    }

    impl CannedTransport {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                sent: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl HttpTransport for CannedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no canned response left")
        }
    }

    fn json(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        })
    }

    fn jwt(payload: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.fake-signature",
            engine.encode(b"{\"alg\":\"HS256\",\"typ\":\"JWT\"}"),
            engine.encode(payload.as_bytes())
        )
    }

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.access_token().unwrap(), None);

        store.store_access_token("a").unwrap();
        store.store_refresh_token("r").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r"));

        store.delete_refresh_token().unwrap();
        store.delete_refresh_token().unwrap();
        assert_eq!(store.refresh_token().unwrap(), None);

        store.clear().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_stores_new_tokens() {
        let transport = CannedTransport::new(vec![json(
            200,
            r#"{"access_token":"new-access","refresh_token":"new-refresh"}"#,
        )]);
        let store = Arc::new(MemoryTokenStore::with_tokens(Some("old"), Some("refresh-1")));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test/api/");

        assert!(refresher.refresh().await);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("new-access"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("new-refresh"));

        let sent = refresher.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].url, "http://api.test/api/auth/refresh");
        assert_eq!(sent[0].header("Authorization"), Some("Bearer refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let transport = CannedTransport::new(vec![json(200, r#"{"access_token":"new-access"}"#)]);
        let store = Arc::new(MemoryTokenStore::with_tokens(None, Some("refresh-1")));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test");

        assert!(refresher.refresh().await);
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_skips_network() {
        let transport = CannedTransport::new(Vec::new());
        let store = Arc::new(MemoryTokenStore::with_tokens(Some("old"), None));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test");

        assert!(!refresher.refresh().await);
        assert_eq!(refresher.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_rejected_clears_refresh_token() {
        let transport = CannedTransport::new(vec![json(401, r#"{"msg":"Token has expired"}"#)]);
        let store = Arc::new(MemoryTokenStore::with_tokens(Some("old"), Some("stale")));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test");

        assert!(!refresher.refresh().await);
        assert_eq!(store.refresh_token().unwrap(), None);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_refresh_network_failure() {
        let transport = CannedTransport::new(vec![Err(TransportError::Connect(
            "connection refused".to_string(),
        ))]);
        let store = Arc::new(MemoryTokenStore::with_tokens(None, Some("r")));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test");

        assert!(!refresher.refresh().await);
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_refresh_unparsable_body() {
        let transport = CannedTransport::new(vec![json(200, r#"{"token":"wrong-field"}"#)]);
        let store = Arc::new(MemoryTokenStore::with_tokens(Some("old"), Some("r")));
        let refresher = HttpTokenRefresher::new(transport, Arc::clone(&store), "http://api.test");

        assert!(!refresher.refresh().await);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_token_subject_string() {
        let token = jwt(r#"{"sub":"user-123-abc","iat":1700000000}"#);
        assert_eq!(token_subject(&token).unwrap(), "user-123-abc");
    }

    #[test]
    fn test_token_subject_numeric() {
        let token = jwt(r#"{"sub":42,"fresh":false}"#);
        assert_eq!(token_subject(&token).unwrap(), "42");
    }

    #[test]
    fn test_token_subject_invalid() {
        assert!(token_subject("not-a-jwt").is_err());
        let missing = token_subject(&jwt(r#"{"iat":1700000000}"#));
        assert!(missing.unwrap_err().contains("sub"));
    }
}
