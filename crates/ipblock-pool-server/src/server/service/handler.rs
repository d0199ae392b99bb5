//! Route handlers.
//!
//! Each handler records request, error and duration metrics under its
//! operation name and maps pool errors through [`ApiError`].

use super::AppState;
use super::request::AllocationParams;
use super::response::BlockResponse;
use crate::server::error::ApiError;
use crate::server::telemetry::{
    increment_allocations_returned, increment_blocks_freed, increment_errors, increment_requests,
    record_request_duration,
};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Instant;

/// Handle GET /pool/allocation
#[tracing::instrument(skip(state))]
pub async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<AllocationParams>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    increment_requests("lookup");

    let result = match params.block() {
        Ok(block) => state.pool.lookup(block, params.key()).await,
        Err(e) => Err(e),
    };
    observe("lookup", started, result.is_err());

    Ok(match result? {
        Some(block) => BlockResponse::new(block, params.pretty()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

/// Handle POST /pool/allocation
#[tracing::instrument(skip(state))]
pub async fn allocate(
    State(state): State<AppState>,
    Query(params): Query<AllocationParams>,
) -> Result<BlockResponse, ApiError> {
    let started = Instant::now();
    increment_requests("allocate");

    let result = state
        .pool
        .allocate(params.key(), params.release_mode())
        .await;
    observe("allocate", started, result.is_err());

    let block = result?;
    increment_allocations_returned();
    Ok(BlockResponse::new(block, params.pretty()))
}

/// Handle DELETE /pool/allocation
#[tracing::instrument(skip(state))]
pub async fn free(
    State(state): State<AppState>,
    Query(params): Query<AllocationParams>,
) -> Result<StatusCode, ApiError> {
    let started = Instant::now();
    increment_requests("free");

    let result = match params.block() {
        Ok(block) => state.pool.free(block, params.key()).await,
        Err(e) => Err(e),
    };
    observe("free", started, result.is_err());

    result?;
    increment_blocks_freed();
    Ok(StatusCode::NO_CONTENT)
}

/// Handle GET /healthz
pub async fn health() -> StatusCode {
    StatusCode::OK
}

fn observe(op: &'static str, started: Instant, failed: bool) {
    record_request_duration(op, started.elapsed().as_secs_f64() * 1_000.0);
    if failed {
        increment_errors(op);
    }
}
