//! HTTP error response conversion.
//!
//! Handlers return `Result<impl IntoResponse, ApiError>`. Service errors
//! convert through `From<Error>`, so `?` renders them with a consistent
//! status, JSON body, and log level.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{
    EnrichmentError, Error, FieldError, FormError, SessionError, SubmissionError,
};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    /// Machine-readable error code for programmatic handling
    pub code: &'static str,
    /// Whether the client can get past this by retrying or fixing input
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

#[derive(Debug)]
pub enum ApiError {
    Service(Error),
    /// Malformed request: bad JSON body or path parameter.
    BadRequest(String),
    NotFound(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Service(err)
    }
}

/// Convert JSON body deserialization failures into a 400 with our body format.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

/// JSON body extractor that returns our error body (400 + JSON) on
/// deserialization failure. Use instead of `Json<T>` for request bodies.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(ApiError::from)?;
        Ok(ValidatedJson(inner))
    }
}

const INTERNAL_MESSAGE: &str = "Something went wrong on our side, please try again";

impl ApiError {
    fn parts(&self) -> (StatusCode, ErrorBody) {
        let body = |error: String, code: &'static str, recoverable: bool| ErrorBody {
            error,
            code,
            recoverable,
            fields: None,
        };

        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                body(msg.clone(), "invalid_request", true),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, body(msg.clone(), "not_found", false)),
            ApiError::Service(err) => service_parts(err),
        }
    }
}

fn service_parts(err: &Error) -> (StatusCode, ErrorBody) {
    let message = err_message(err);
    let simple = |status: StatusCode, code: &'static str, recoverable: bool| {
        (
            status,
            ErrorBody {
                error: message.clone(),
                code,
                recoverable,
                fields: None,
            },
        )
    };

    match err {
        Error::Validation(errors) | Error::Submission(SubmissionError::Invalid(errors)) => (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                error: "Some fields need attention".to_string(),
                code: "validation_error",
                recoverable: true,
                fields: Some(errors.fields.clone()),
            },
        ),
        Error::Session(SessionError::NotFound { .. }) => {
            simple(StatusCode::NOT_FOUND, "session_not_found", true)
        }
        Error::Session(SessionError::Conflict { .. }) => {
            simple(StatusCode::CONFLICT, "session_conflict", true)
        }
        Error::Session(SessionError::Storage(_)) => {
            simple(StatusCode::INTERNAL_SERVER_ERROR, "session_storage_error", true)
        }
        Error::Enrichment(EnrichmentError::Unavailable { .. }) => {
            simple(StatusCode::BAD_GATEWAY, "enrichment_unavailable", true)
        }
        Error::Enrichment(EnrichmentError::MissingInput { .. }) => {
            simple(StatusCode::BAD_REQUEST, "enrichment_missing_input", true)
        }
        Error::Enrichment(EnrichmentError::InProgress { .. }) => {
            simple(StatusCode::CONFLICT, "enrichment_in_progress", true)
        }
        Error::Submission(SubmissionError::Incomplete { .. }) => {
            simple(StatusCode::BAD_REQUEST, "form_incomplete", true)
        }
        Error::Submission(SubmissionError::Duplicate { .. }) => {
            simple(StatusCode::CONFLICT, "duplicate_lead", false)
        }
        Error::Submission(SubmissionError::Storage(_)) => {
            simple(StatusCode::INTERNAL_SERVER_ERROR, "submission_failed", true)
        }
        Error::Form(FormError::OutOfOrder { .. }) => {
            simple(StatusCode::BAD_REQUEST, "step_out_of_order", true)
        }
        Error::Form(FormError::InvalidTransition { .. }) => {
            simple(StatusCode::CONFLICT, "invalid_transition", true)
        }
        Error::Form(FormError::UnknownStep(_)) => {
            simple(StatusCode::NOT_FOUND, "unknown_step", false)
        }
        Error::Database(_) => simple(StatusCode::INTERNAL_SERVER_ERROR, "database_error", true),
        Error::Config(_) => simple(StatusCode::INTERNAL_SERVER_ERROR, "config_error", false),
    }
}

/// Client-facing message. Storage internals stay in the logs.
fn err_message(err: &Error) -> String {
    match err {
        Error::Session(SessionError::Storage(_))
        | Error::Database(_)
        | Error::Config(_) => INTERNAL_MESSAGE.to_string(),
        Error::Submission(SubmissionError::Storage(_)) => {
            "We could not save your application, please submit again".to_string()
        }
        Error::Session(e) => e.to_string(),
        Error::Enrichment(e) => e.to_string(),
        Error::Submission(e) => e.to_string(),
        Error::Form(e) => e.to_string(),
        Error::Validation(e) => e.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();

        let detail = match &self {
            ApiError::Service(err) => err.to_string(),
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), code = body.code, error = %detail, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), code = body.code, error = %detail, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}
