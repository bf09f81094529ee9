//! API client module for SynergySphere.
//!
//! Provides the request gateway with bearer auth injection, keychain token
//! storage and refresh, response classification, and the HTTP transport seam.

pub mod auth;
pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::ApiGateway;
pub use error::ApiError;
pub use types::{ApiRequest, FormPayload, Payload};
