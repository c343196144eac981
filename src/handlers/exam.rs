// src/handlers/exam.rs

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam_result::SubmitExamRequest,
        exam_session::{AudioAnswerParams, NavigateRequest, SaveAnswerRequest, VisibilityRequest},
        user::Principal,
    },
    state::AppState,
};

/// Starts a new attempt or resumes the saved one.
///
/// 409 if the caller already completed the exam, 403 for administrators.
pub async fn start_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let (_, snapshot) = state.sessions.open(&principal).await?;
    Ok(Json(snapshot))
}

/// Current state of the attempt. Loads it if this process has not yet.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let (handle, _) = state.sessions.open(&principal).await?;
    Ok(Json(handle.snapshot().await))
}

pub async fn navigate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<NavigateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (handle, _) = state.sessions.open(&principal).await?;
    let snapshot = handle.navigate(payload.direction).await?;
    Ok(Json(snapshot))
}

/// Records a text or choice answer for the current question and advances.
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let (handle, _) = state.sessions.open(&principal).await?;
    let snapshot = handle.save_text_answer(payload.text).await?;
    Ok(Json(snapshot))
}

/// Stores a recorded answer for the current question.
///
/// The body is the raw audio. Transcription runs in the background and
/// never delays the response.
pub async fn save_audio_answer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AudioAnswerParams>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if body.is_empty() {
        return Err(AppError::ValidationFailed(
            "Please record an answer before continuing.".to_string(),
        ));
    }

    let (handle, _) = state.sessions.open(&principal).await?;
    let saved = handle
        .save_audio_answer(body.to_vec(), params.duration_ms)
        .await?;
    Ok(Json(saved.snapshot))
}

/// Records a tab-visibility change.
///
/// A session already loaded here is used without taking its lock, so the
/// event keeps its timestamp while a save or submit is in flight.
pub async fn record_visibility(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<VisibilityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = match state.sessions.live(&principal.uid).await {
        Some(handle) => handle,
        None => state.sessions.open(&principal).await?.0,
    };
    let recorded = handle.record_visibility(payload.hidden);

    Ok(Json(json!({
        "recorded": recorded,
        "tabChangeCount": handle.tab_change_count()
    })))
}

/// Finalizes the attempt.
///
/// Without `confirmIncomplete` an attempt with unanswered questions is
/// refused with 409 and the answered/total counts.
pub async fn submit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .sessions
        .submit(&principal, payload.confirm_incomplete)
        .await?;
    Ok(Json(receipt))
}
