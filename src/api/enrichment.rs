//! Explicit business verification route.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiError, ValidatedJson};

pub fn routes() -> Router<AppState> {
    Router::new().route("/enrichment", post(enrich))
}

#[derive(Debug, Deserialize)]
struct EnrichmentRequest {
    #[serde(default)]
    business_name: String,
    #[serde(default)]
    zip_code: String,
    session_id: String,
}

/// POST /enrichment
///
/// Runs the verification call for a session and stores the result on it.
/// A simulated upstream failure is returned as 502.
async fn enrich(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EnrichmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .orchestrator
        .enrich_now(&req.session_id, &req.business_name, &req.zip_code)
        .await?;
    Ok(Json(result))
}
