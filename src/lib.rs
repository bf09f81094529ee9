//! Client-side gateway for the SynergySphere project-management backend.
//!
//! [`state::AppState`] is the composition root: it owns the loading registry,
//! the connectivity state and the [`api::ApiGateway`] that issues every
//! authenticated call.

pub mod api;
pub mod config;
pub mod state;

pub use api::{ApiError, ApiGateway, ApiRequest, FormPayload, Payload};
pub use config::{Config, Environment};
pub use state::{AppState, ConnectivityState, LoadingRegistry, Subscription};
