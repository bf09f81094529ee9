//! Request gateway: authenticated calls with loading bookkeeping,
//! connectivity tracking and a single replay after a token refresh.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::auth::{TokenRefresher, TokenStore};
use super::error::{classify, ApiError, Outcome};
use super::transport::{HttpRequest, HttpTransport, RequestBody, NO_CACHE_HEADERS};
use super::types::{ApiRequest, Payload};
use crate::config::Config;
use crate::state::{ConnectivityState, LoadingGuard, LoadingRegistry};

/// Endpoints callable before authentication; no bearer header is attached.
const PUBLIC_ENDPOINTS: [&str; 2] = ["/auth/login", "/auth/register"];

/// Whether `endpoint` must be sent without an `Authorization` header.
pub fn is_public_endpoint(endpoint: &str) -> bool {
    PUBLIC_ENDPOINTS.iter().any(|p| endpoint.contains(p))
}

/// Gateway for all backend calls.
///
/// Generic over the transport, the refresh collaborator and the token store so
/// each can be substituted in tests. The loading and connectivity registries
/// are shared with whatever observes them.
pub struct ApiGateway<T, R, S> {
    transport: T,
    refresher: R,
    tokens: Arc<S>,
    loading: Arc<LoadingRegistry>,
    connectivity: Arc<ConnectivityState>,
    base_url: String,
    timeout: Duration,
}

impl<T, R, S> ApiGateway<T, R, S>
where
    T: HttpTransport,
    R: TokenRefresher,
    S: TokenStore,
{
    pub fn new(
        config: &Config,
        transport: T,
        refresher: R,
        tokens: Arc<S>,
        loading: Arc<LoadingRegistry>,
        connectivity: Arc<ConnectivityState>,
    ) -> Self {
        Self {
            transport,
            refresher,
            tokens,
            loading,
            connectivity,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn loading(&self) -> &Arc<LoadingRegistry> {
        &self.loading
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityState> {
        &self.connectivity
    }

    #[cfg(test)]
    pub(crate) fn transport_for_test(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn refresher_for_test(&self) -> &R {
        &self.refresher
    }

    /// Issue `request` and return the parsed JSON body.
    ///
    /// If the server reports an expired access token, the refresh collaborator
    /// is asked for a new one and the identical request is replayed once. An
    /// expiry reported by the replay is final and yields
    /// [`ApiError::SessionExpired`].
    pub async fn request(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.execute(request).await.map(|(_, body)| body)
    }

    /// Issue `request` and deserialize the body into `D`.
    pub async fn request_as<D: DeserializeOwned>(&self, request: &ApiRequest) -> Result<D, ApiError> {
        let (status, value) = self.execute(request).await?;
        serde_json::from_value(value).map_err(|e| ApiError::MalformedResponse {
            status,
            reason: format!("unexpected response shape: {}", e),
        })
    }

    /// Request flow shared by `request` and `request_as`; yields the status of
    /// the response that produced the body.
    async fn execute(&self, request: &ApiRequest) -> Result<(u16, Value), ApiError> {
        let _loading = LoadingGuard::acquire(&self.loading, request.loading_key.as_deref());

        match self.attempt(request).await? {
            (_, Outcome::TokenExpired) => {}
            (status, outcome) => return outcome.into_result().map(|body| (status, body)),
        }

        log::info!(
            "Access token expired on {} {}, attempting refresh",
            request.method,
            request.endpoint
        );
        if !self.refresher.refresh().await {
            log::warn!("Token refresh failed, session expired");
            return Err(ApiError::SessionExpired);
        }

        match self.attempt(request).await? {
            (_, Outcome::TokenExpired) => {
                log::warn!(
                    "Token still expired after refresh on {} {}",
                    request.method,
                    request.endpoint
                );
                Err(ApiError::SessionExpired)
            }
            (status, outcome) => outcome.into_result().map(|body| (status, body)),
        }
    }

    pub async fn get(&self, endpoint: &str, loading_key: Option<&str>) -> Result<Value, ApiError> {
        self.request(&with_key(ApiRequest::get(endpoint), loading_key))
            .await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        body: Value,
        loading_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.request(&with_key(ApiRequest::post(endpoint).with_json(body), loading_key))
            .await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        body: Value,
        loading_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.request(&with_key(ApiRequest::put(endpoint).with_json(body), loading_key))
            .await
    }

    pub async fn patch(
        &self,
        endpoint: &str,
        body: Value,
        loading_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.request(&with_key(ApiRequest::patch(endpoint).with_json(body), loading_key))
            .await
    }

    pub async fn delete(&self, endpoint: &str, loading_key: Option<&str>) -> Result<Value, ApiError> {
        self.request(&with_key(ApiRequest::delete(endpoint), loading_key))
            .await
    }

    /// One round trip: build, dispatch under the timeout, record connectivity, classify.
    async fn attempt(&self, request: &ApiRequest) -> Result<(u16, Outcome), ApiError> {
        let http = self.build(request)?;
        log::debug!("{} {}", http.method, http.url);

        let response = match tokio::time::timeout(self.timeout, self.transport.send(&http)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let err = ApiError::from(e);
                if err.is_network() {
                    self.connectivity.set_online(false);
                }
                log::warn!("{} {} failed: {:?}", http.method, http.url, err);
                return Err(err);
            }
            Err(_) => {
                log::warn!(
                    "{} {} timed out after {}s",
                    http.method,
                    http.url,
                    self.timeout.as_secs()
                );
                return Err(ApiError::Timeout);
            }
        };

        self.connectivity.set_online(true);
        log::debug!("{} {} -> {}", http.method, http.url, response.status);
        Ok((response.status, classify(&response)))
    }

    fn build(&self, request: &ApiRequest) -> Result<HttpRequest, ApiError> {
        let mut headers: Vec<(String, String)> = NO_CACHE_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let body = match &request.payload {
            None => RequestBody::Empty,
            Some(Payload::Form(form)) => RequestBody::Form(form.clone()),
            Some(Payload::Json(value)) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                let bytes = serde_json::to_vec(value)
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                RequestBody::Json(bytes)
            }
        };

        if !is_public_endpoint(&request.endpoint) {
            match self.tokens.access_token()? {
                Some(token) => {
                    headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
                }
                None => log::debug!("No access token stored for {}", request.endpoint),
            }
        }

        Ok(HttpRequest {
            method: request.method.clone(),
            url: format!("{}{}", self.base_url, request.endpoint),
            headers,
            body,
        })
    }
}

fn with_key(request: ApiRequest, loading_key: Option<&str>) -> ApiRequest {
    match loading_key {
        Some(key) => request.with_loading_key(key),
        None => request,
    }
}
