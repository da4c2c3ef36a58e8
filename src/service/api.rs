//! HTTP API for match and cancel requests

use crate::error::MatchmakingError;
use crate::service::app::AppState;
use crate::types::{MatchRequest, ParticipantId};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes for the match API
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/match", post(request_match_handler))
        .route("/v1/match/{participant_id}", delete(cancel_handler))
        .with_state(app_state)
}

async fn request_match_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            debug!("Rejected match request body: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_request",
                    "message": rejection.body_text()
                })),
            )
                .into_response();
        }
    };

    match app_state.engine().request_match(request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn cancel_handler(
    State(app_state): State<Arc<AppState>>,
    Path(participant_id): Path<ParticipantId>,
) -> Response {
    match app_state.engine().cancel(&participant_id).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "participant_id": participant_id,
                "outcome": outcome
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Map an engine error to an HTTP response
///
/// Store failures become 503 so callers retry the whole request.
pub fn error_response(error: &anyhow::Error) -> Response {
    let (status, kind) = match error.downcast_ref::<MatchmakingError>() {
        Some(MatchmakingError::InvalidMatchRequest { .. }) => {
            (StatusCode::BAD_REQUEST, "invalid_request")
        }
        Some(MatchmakingError::StoreUnavailable { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
        Some(MatchmakingError::ParticipantNotFound { .. }) => {
            (StatusCode::NOT_FOUND, "participant_not_found")
        }
        Some(MatchmakingError::ConfigurationError { .. })
        | Some(MatchmakingError::InternalError { .. })
        | None => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    warn!("Request failed with {}: {}", status, error);

    let body = Json(json!({
        "error": kind,
        "message": error.to_string()
    }));

    if status == StatusCode::SERVICE_UNAVAILABLE {
        (status, [(header::RETRY_AFTER, "1")], body).into_response()
    } else {
        (status, body).into_response()
    }
}
