// src/handlers/results.rs

use axum::{
    Json,
    extract::{Extension, State},
    response::IntoResponse,
};

use crate::{error::AppError, models::user::Principal, services::analytics, state::AppState};

/// The caller's submitted attempts, newest first.
pub async fn list_results(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let results = analytics::load_results(state.store.as_ref(), &principal.uid)
        .await
        .map_err(|e| {
            tracing::error!(uid = %principal.uid, "Failed to load results: {}", e);
            AppError::from(e)
        })?;

    Ok(Json(results))
}

/// Aggregate statistics over the caller's attempts.
pub async fn get_analytics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let results = analytics::load_results(state.store.as_ref(), &principal.uid).await?;
    Ok(Json(analytics::summarize(&results)))
}
