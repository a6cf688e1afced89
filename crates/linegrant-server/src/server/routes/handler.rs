//! HTTP handlers for the claim service.
//!
//! ## Responsibilities
//!
//! - Decode request bodies leniently (see [`payload`](super::payload)).
//! - Enforce the per-request batch limit before anything reaches the queue.
//! - Forward claims and ingestion to the [`ClaimCoordinator`] and map its
//!   failures onto HTTP status codes.
//! - Expose the durable log and the auxiliary resource read-only.
//!
//! [`ClaimCoordinator`]: linegrant::ClaimCoordinator

use crate::server::{
    routes::payload::{ClaimPayload, ClaimResponse, IngestPayload, IngestResponse},
    state::AppState,
    telemetry::{
        add_claim_failures, add_claims, add_lines_granted, add_lines_ingested,
        add_lines_rejected, record_claim_duration, record_lines_per_claim,
    },
};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use linegrant::{Error, filter_candidates};
use std::io::ErrorKind;

/// HTTP status for a coordinator error.
fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::Io { .. } | Error::ChannelError { .. } | Error::CyclePanicked { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `POST /claim`
///
/// Always answers with both partitions. On failure `claimed` is empty,
/// `rejected` holds every filtered candidate and `error` explains why.
#[tracing::instrument(skip_all)]
pub async fn claim(State(state): State<AppState>, body: Bytes) -> Response {
    let start = std::time::Instant::now();
    let payload = ClaimPayload::from_body(&body);
    let candidates = filter_candidates(&payload.lines);

    if state.is_shutting_down() {
        add_claim_failures(1);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ClaimResponse::failed(candidates, Error::ServiceShutdown)),
        )
            .into_response();
    }

    if candidates.len() > state.max_batch_lines() {
        add_claim_failures(1);
        let reason = format!(
            "batch of {} lines exceeds maximum allowed ({})",
            candidates.len(),
            state.max_batch_lines()
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(ClaimResponse::failed(candidates, reason)),
        )
            .into_response();
    }

    add_claims(1);
    record_lines_per_claim(candidates.len() as f64);
    let _inflight = state.track();

    let response = match state
        .coordinator()
        .claim_identifiers(candidates, payload.limit)
        .await
    {
        Ok(outcome) => {
            add_lines_granted(outcome.claimed.len() as u64);
            add_lines_rejected(outcome.rejected.len() as u64);
            (
                StatusCode::OK,
                Json(ClaimResponse {
                    claimed: outcome.claimed,
                    rejected: outcome.rejected,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!("Claim failed: {err}");
            add_claim_failures(1);
            add_lines_rejected(err.rejected.len() as u64);
            (
                status_of(&err.source),
                Json(ClaimResponse::failed(err.rejected, err.source)),
            )
                .into_response()
        }
    };

    record_claim_duration(start.elapsed().as_secs_f64() * 1000.0);
    response
}

/// `POST /append`
///
/// Bulk-loads lines without handing out grants. `added` counts lines that
/// were not in the log yet.
#[tracing::instrument(skip_all)]
pub async fn append(State(state): State<AppState>, body: Bytes) -> Response {
    let lines = filter_candidates(IngestPayload::from_body(&body).lines);

    if state.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(IngestResponse::failed(Error::ServiceShutdown)),
        )
            .into_response();
    }

    if lines.len() > state.max_batch_lines() {
        let reason = format!(
            "batch of {} lines exceeds maximum allowed ({})",
            lines.len(),
            state.max_batch_lines()
        );
        return (StatusCode::BAD_REQUEST, Json(IngestResponse::failed(reason))).into_response();
    }

    let _inflight = state.track();
    match state.coordinator().ingest_identifiers(lines).await {
        Ok(added) => {
            add_lines_ingested(added as u64);
            (StatusCode::OK, Json(IngestResponse::added(added))).into_response()
        }
        Err(err) => {
            tracing::error!("Append failed: {err}");
            (status_of(&err), Json(IngestResponse::failed(err))).into_response()
        }
    }
}

/// `GET /lines`: the raw log. May trail an in-flight claim.
pub async fn list_lines(State(state): State<AppState>) -> Response {
    use linegrant::LineStore;

    match state.log().read_log().await {
        Ok(contents) => plain_text(contents),
        Err(err) => {
            tracing::error!("Listing failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// `GET /aux`: the auxiliary text resource, if one is configured and seeded.
pub async fn aux(State(state): State<AppState>) -> Response {
    let Some(path) = state.aux_file() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => plain_text(contents),
        Err(err) if err.kind() == ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(path = %path.display(), "Reading auxiliary resource failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    if state.is_shutting_down() || state.coordinator().is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    } else {
        (StatusCode::OK, "ok").into_response()
    }
}

fn plain_text(contents: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        contents,
    )
        .into_response()
}
