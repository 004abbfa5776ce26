// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the attested-fetch router.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | POST | `/attest/fetch` | [`attest_fetch`] | Forward a fetch request to its enclave |
//! | GET | `/health` | [`health`] | Fleet health from `nitro-cli` |
//! | GET | `/routes` | [`routes`] | Routing-table diagnostics |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::application::AppState;
use crate::constants::ENCLAVE_CALL_TIMEOUT;
use crate::errors::AppError;
use crate::models::{EnclaveFetchRequest, FetchRequest, RouteInfo};
use crate::{health as health_probe, routing};

/// Forwards one fetch request to the enclave owning the URL's hostname.
///
/// The enclave's framed reply is returned verbatim: the HTTP layer only
/// signals transport-level outcomes (400/404/502), while enclave-level
/// verdicts (403 allowlist refusal, 502 upstream failure, attestation)
/// travel inside the JSON envelope.
#[tracing::instrument(skip(state, request))]
pub async fn attest_fetch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FetchRequest>,
) -> Result<Response, AppError> {
    request
        .validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let url = request.url.clone().ok_or(AppError::MissingField("url"))?;
    let method = request
        .method
        .clone()
        .ok_or(AppError::MissingField("method"))?;

    let hostname = Url::parse(&url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| AppError::InvalidUrl(url.clone()))?;

    let route = state
        .table
        .lookup(&hostname)
        .ok_or_else(|| AppError::NoRoute(hostname.clone()))?;
    let (cid, port) = (route.cid, route.port);

    let id = request
        .id
        .clone()
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()));
    tracing::info!("[router] id={} {} {} -> cid {}", id, method, hostname, cid);

    let frame = EnclaveFetchRequest {
        id,
        url,
        method,
        headers: request.headers.clone(),
        body: request.body.clone(),
    };
    let payload = serde_json::to_string(&frame)?;

    // Vsock I/O is synchronous; keep it off the async workers.
    let reply = timeout(
        ENCLAVE_CALL_TIMEOUT,
        tokio::task::spawn_blocking(move || routing::forward(cid, port, payload)),
    )
    .await
    .map_err(|_| AppError::EnclaveTimeout)?
    .map_err(|e| {
        tracing::error!("[router] spawn_blocking task failed: {:?}", e);
        AppError::InternalServerError
    })??;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        reply,
    )
        .into_response())
}

/// Fleet health: 200 when every routed enclave is `RUNNING`, 503 otherwise.
/// `--skip-health-probe` short-circuits the `nitro-cli` check for local
/// development off an EC2 host.
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    if state.options.skip_health_probe {
        tracing::warn!("[router] health probe skipped by configuration");
        let report = crate::models::HealthReport {
            healthy: true,
            enclaves: Vec::new(),
        };
        return (StatusCode::OK, Json(report)).into_response();
    }

    let report = health_probe::check(&state.table).await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// Routing-table diagnostics.
pub async fn routes(State(state): State<Arc<AppState>>) -> Json<Vec<RouteInfo>> {
    Json(state.table.routes().to_vec())
}
