// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::{review::ReviewRequest, user::Principal},
    services::{reconcile, review_queue},
    state::AppState,
    store::is_valid_segment,
};

/// Lists users with an attempt in progress or submitted.
/// Admin only.
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let users = review_queue::list_users(state.store.as_ref())
        .await
        .map_err(|e| {
            tracing::error!("Failed to list users: {}", e);
            AppError::from(e)
        })?;

    Ok(Json(users))
}

/// Audio answers of one user awaiting (or after) review.
/// Admin only.
pub async fn list_user_answers(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_valid_segment(&uid) {
        return Err(AppError::BadRequest(format!("Invalid user id '{}'", uid)));
    }

    let items = review_queue::list_review_items(state.store.as_ref(), &state.bank, &uid).await?;
    Ok(Json(items))
}

/// Stores a manual correction and re-scores affected results.
/// Admin only.
pub async fn submit_review(
    State(state): State<AppState>,
    Extension(reviewer): Extension<Principal>,
    Json(payload): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::ValidationFailed(validation_errors.to_string()));
    }
    if !is_valid_segment(&payload.user_id) || !is_valid_segment(&payload.question_key) {
        return Err(AppError::BadRequest("Invalid user id or question key".to_string()));
    }

    let outcome = reconcile::apply_review(&state.sessions, &reviewer, payload).await?;

    if !outcome.results_failed.is_empty() {
        tracing::warn!(
            failed = ?outcome.results_failed,
            "Review saved but some results were not updated"
        );
    }
    Ok(Json(outcome))
}
