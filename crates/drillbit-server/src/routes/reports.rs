use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use drillbit_core::detail::DetailRequest;
use drillbit_core::report::ReportRequest;

use crate::{error::AppError, state::AppState};

/// Decode a request body, reporting malformed JSON and schema mismatches as
/// `400 validation_error` instead of Axum's plain-text rejections.
fn parse_body<T: DeserializeOwned>(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<T, AppError> {
    let Json(raw) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    serde_json::from_value(raw).map_err(|e| AppError::bad_request(e.to_string()))
}

/// `POST /api/reports/query`: one drill level of a report.
#[tracing::instrument(skip(state, body))]
pub async fn query_report(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request: ReportRequest = parse_body(body)?;
    let response = state.engine.run_report(&request).await?;
    Ok(Json(response))
}

/// `POST /api/reports/detail`: the page views behind a report cell.
#[tracing::instrument(skip(state, body))]
pub async fn report_detail(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request: DetailRequest = parse_body(body)?;
    let response = state.engine.run_detail(&request).await?;
    Ok(Json(response))
}
