//! Lead routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use super::AppState;
use super::error::{ApiError, ValidatedJson};
use crate::lead::{Lead, LeadPayload};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/leads", post(create_lead))
        .route("/leads/submit/{session_id}", post(submit_from_session))
        .route("/leads/{id}", get(get_lead))
}

fn created(lead: &Lead) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "lead_id": lead.id,
            "created_at": lead.created_at,
        })),
    )
}

/// POST /leads: create a lead from a full payload.
async fn create_lead(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LeadPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let lead = state.orchestrator.create_lead(payload).await?;
    Ok(created(&lead))
}

/// POST /leads/submit/{session_id}: finalize from the stored session.
async fn submit_from_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lead = state.orchestrator.submit_session(&session_id).await?;
    Ok(created(&lead))
}

async fn get_lead(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lead_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid lead id: {id}")))?;
    match state.orchestrator.get_lead(lead_id).await? {
        Some(lead) => Ok(Json(lead)),
        None => Err(ApiError::NotFound(format!("Lead {lead_id} not found"))),
    }
}
