//! Vault Server Library
//!
//! Streaming encrypted file storage on S3-compatible backends. The binary in
//! main.rs wires configuration, storage and the router together.
//!
//! # Modules
//!
//! - `uid`: concurrent UID allocation
//! - `crypto`: AES-CTR stream cipher
//! - `transfer`: upload pipeline and fetch path
//! - `storage`: object store backends
//! - `routes`: HTTP handlers

pub mod config;
pub mod crypto;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod transfer;
pub mod uid;

use axum::Router;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the HTTP router
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::upload::router())
        .merge(routes::fetch::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
