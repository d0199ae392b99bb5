//! HTTP routes exposing the block pool.
//!
//! ## Structure
//!
//! - [`handler`] - route handlers for `/pool/allocation` and `/healthz`.
//! - [`request`] - query parameter parsing.
//! - [`response`] - JSON rendering of block records.

pub mod handler;
pub mod request;
pub mod response;

use axum::Router;
use axum::routing::get;
use ipblock_pool::PoolManager;
use std::sync::Arc;

pub const ALLOCATION_PATH: &str = "/pool/allocation";
pub const HEALTH_PATH: &str = "/healthz";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolManager>,
}

pub fn router(pool: Arc<PoolManager>) -> Router {
    Router::new()
        .route(
            ALLOCATION_PATH,
            get(handler::lookup)
                .post(handler::allocate)
                .delete(handler::free),
        )
        .route(HEALTH_PATH, get(handler::health))
        .with_state(AppState { pool })
}
