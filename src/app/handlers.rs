// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;

use crate::{
    datasource::{MetricsMetadata, Series},
    error::AppError,
    hints::{FixAction, QueryHint, RuleMapping},
};

use super::{
    responses::{ApiResponse, AppliedFix},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/query_hints", post(query_hints))
        .route("/api/v1/query_hints/apply", post(apply_fix))
        .route("/api/v1/rules", get(list_rules))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

#[derive(Debug, Deserialize)]
struct HintsRequest {
    query: String,
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    metadata: Option<MetricsMetadata>,
}

#[derive(Debug, Deserialize)]
struct ApplyRequest {
    action: FixAction,
}

async fn query_hints(
    State(state): State<AppState>,
    payload: Result<Json<HintsRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Vec<QueryHint>>>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::BadRequest(err.body_text()))?;
    log::debug!(
        "hint request received: query=`{}` series={}",
        request.query,
        request.series.len()
    );
    let hints = state.hints(&request.query, &request.series, request.metadata.as_ref())?;
    Ok(Json(ApiResponse::success(hints)))
}

async fn apply_fix(
    State(state): State<AppState>,
    payload: Result<Json<ApplyRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AppliedFix>>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::BadRequest(err.body_text()))?;
    let query = state.apply_fix(&request.action)?;
    Ok(Json(ApiResponse::success(AppliedFix { query })))
}

async fn list_rules(State(state): State<AppState>) -> Json<ApiResponse<RuleMapping>> {
    Json(ApiResponse::success(state.rules().clone()))
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();
    log::info!(
        "method={} path={} status={} duration_ms={:.3}",
        method,
        uri.path(),
        status.as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    response
}
