//! Session routes: CRUD, step submission and back navigation.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::AppState;
use super::error::{ApiError, ValidatedJson};
use crate::error::FormError;
use crate::form::{BusinessInfo, FinancialInfo, FormFields, FormStep, PersonalInfo};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{id}",
            get(get_session)
                .put(update_session)
                .delete(delete_session),
        )
        .route("/sessions/{id}/steps/{step}", post(submit_step))
        .route("/sessions/{id}/back", post(go_back))
}

#[derive(Debug, Deserialize)]
struct UpdateSessionRequest {
    form_data: serde_json::Map<String, serde_json::Value>,
}

async fn create_session(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = state.orchestrator.create_session().await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.orchestrator.get_session(&id).await?;
    Ok(Json(session).into_response())
}

/// PUT /sessions/{id}
///
/// Merges `form_data` into the stored fields. Bookkeeping keys in the body
/// are ignored; any other unknown key is a 400.
async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateSessionRequest>,
) -> Result<Response, ApiError> {
    let fields = FormFields::from_update(body.form_data).map_err(crate::error::Error::from)?;
    let update = state.orchestrator.update_fields(&id, &fields).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "session": update.session,
        "enrichment_triggered": update.enrichment_triggered,
    }))
    .into_response())
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.orchestrator.delete_session(&id).await?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))
}

/// POST /sessions/{id}/steps/{step}
///
/// Steps 1 and 2 return the updated session plus warnings. Step 3 finalizes
/// the form and returns the new lead ID.
async fn submit_step(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, String)>,
    ValidatedJson(body): ValidatedJson<serde_json::Value>,
) -> Result<Response, ApiError> {
    let number: u8 = step
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid step: {step}")))?;
    let step = FormStep::try_from(number)
        .map_err(|_| crate::error::Error::from(FormError::UnknownStep(number)))?;

    let orch = &state.orchestrator;
    match step {
        FormStep::Personal => {
            let input: PersonalInfo = parse_body(body)?;
            Ok(Json(orch.submit_personal(&id, &input).await?).into_response())
        }
        FormStep::Business => {
            let input: BusinessInfo = parse_body(body)?;
            Ok(Json(orch.submit_business(&id, &input).await?).into_response())
        }
        FormStep::Financial => {
            let input: FinancialInfo = parse_body(body)?;
            let lead = orch.submit_financial(&id, &input).await?;
            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "lead_id": lead.id,
                    "created_at": lead.created_at,
                })),
            )
                .into_response())
        }
        FormStep::Submitted => {
            Err(crate::error::Error::from(FormError::UnknownStep(number)).into())
        }
    }
}

async fn go_back(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.orchestrator.back(&id).await?;
    Ok(Json(session).into_response())
}
