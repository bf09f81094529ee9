//! Observable client state and the composition root.
//!
//! Nothing here is a process-wide singleton: [`AppState`] constructs the
//! registries and the gateway and hands out shared references.

mod connectivity;
mod loading;

pub use connectivity::ConnectivityState;
pub use loading::{LoadingGuard, LoadingRegistry};

use std::sync::Arc;

use crate::api::auth::{HttpTokenRefresher, TokenStore, TokenStoreError};
use crate::api::client::ApiGateway;
use crate::api::transport::ReqwestTransport;
use crate::config::Config;

/// Callback invoked with the new value of an observed flag.
pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to detach.
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Remove exactly the callback this subscription registered.
    pub fn unsubscribe(self) {
        (self.cancel)();
    }
}

/// Production gateway type.
pub type Gateway<S> = ApiGateway<ReqwestTransport, HttpTokenRefresher<ReqwestTransport, S>, S>;

/// Application state shared by everything that issues or observes requests.
pub struct AppState<S: TokenStore> {
    pub config: Config,

    /// Loading flags per key, for progress indicators.
    pub loading: Arc<LoadingRegistry>,

    pub connectivity: Arc<ConnectivityState>,

    /// Credential store; read by the gateway, written by login and refresh.
    pub tokens: Arc<S>,

    pub api: Arc<Gateway<S>>,
}

impl<S: TokenStore> AppState<S> {
    pub fn new(config: Config, tokens: S) -> Self {
        let tokens = Arc::new(tokens);
        let loading = Arc::new(LoadingRegistry::new());
        let connectivity = Arc::new(ConnectivityState::new());

        let transport = ReqwestTransport::new(config.timeout, config.connect_timeout);
        let refresher =
            HttpTokenRefresher::new(transport.clone(), Arc::clone(&tokens), &config.base_url);
        let api = Arc::new(ApiGateway::new(
            &config,
            transport,
            refresher,
            Arc::clone(&tokens),
            Arc::clone(&loading),
            Arc::clone(&connectivity),
        ));

        Self {
            config,
            loading,
            connectivity,
            tokens,
            api,
        }
    }

    /// Drop stored credentials and in-flight flags (logout).
    pub fn clear_session(&self) -> Result<(), TokenStoreError> {
        self.loading.reset();
        self.tokens.clear()
    }
}
