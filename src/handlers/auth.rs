// src/handlers/auth.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{Account, LoginRequest, RegisterRequest, Role},
    services::accounts,
    state::AppState,
    utils::jwt::sign_jwt,
};

fn role_of(account: &Account) -> Role {
    if account.admin { Role::Admin } else { Role::ExamTaker }
}

fn issue_token(state: &AppState, account: &Account) -> Result<String, AppError> {
    sign_jwt(
        &account.uid,
        &account.email,
        role_of(account).as_str(),
        &state.config.jwt_secret,
        state.config.jwt_expiration,
    )
}

/// Registers a new exam taker.
///
/// Returns 201 Created with a token so the client can start right away.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::ValidationFailed(validation_errors.to_string()));
    }

    let account = accounts::register(state.store.as_ref(), &payload).await?;
    let token = issue_token(&state, &account)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "uid": account.uid,
            "email": account.email,
            "token": token,
            "type": "Bearer"
        })),
    ))
}

/// Authenticates a user and returns a JWT token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let account = accounts::authenticate(state.store.as_ref(), &payload.email, &payload.password)
        .await
        .inspect_err(|e| tracing::info!("Login rejected for {}: {}", payload.email, e))?;

    let token = issue_token(&state, &account)?;

    Ok(Json(json!({
        "uid": account.uid,
        "email": account.email,
        "token": token,
        "type": "Bearer",
        "role": role_of(&account).as_str()
    })))
}
