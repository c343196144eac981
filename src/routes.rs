// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, exam, results},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Largest accepted audio answer.
pub const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, exam, results, admin) and the media files.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let exam_routes = Router::new()
        .route(
            "/session",
            get(exam::get_session).post(exam::start_session),
        )
        .route("/navigate", post(exam::navigate))
        .route("/answers", post(exam::save_answer))
        .route(
            "/answers/audio",
            post(exam::save_audio_answer).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .route("/visibility", post(exam::record_visibility))
        .route("/submit", post(exam::submit))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let results_routes = Router::new()
        .route("/api/results", get(results::list_results))
        .route("/api/results/analytics", get(results::get_analytics))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{uid}/answers", get(admin::list_user_answers))
        .route("/reviews", post(admin::submit_review))
        // Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let media = ServeDir::new(&state.config.media_root);

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/exam", exam_routes)
        .merge(results_routes)
        .nest("/api/admin", admin_routes)
        .nest_service("/media", media)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Config, ExamSettings};
    use crate::models::question::QuestionBank;
    use crate::services::transcription::DisabledTranscriber;
    use crate::store::{MemoryBlobStore, MemoryStore};
    use crate::utils::{clock::SystemClock, jwt::sign_jwt};

    fn app() -> Router {
        let config = Config {
            database_url: None,
            jwt_secret: "router_test_secret".to_string(),
            jwt_expiration: 60,
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string(), "not a header\n".to_string()],
            admin_email: None,
            admin_password: None,
            media_root: "media".into(),
            public_base_url: "http://localhost:3000/".parse().unwrap(),
            question_bank_path: None,
            transcription_url: None,
            transcription_token: None,
            exam: ExamSettings::default(),
        };
        create_router(AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(DisabledTranscriber),
            Arc::new(QuestionBank::bundled().unwrap()),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/exam/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn preflight_allows_configured_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/auth/login")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn oversized_audio_is_rejected() {
        let token = sign_jwt("u1", "u1@example.com", "examTaker", "router_test_secret", 60).unwrap();
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/exam/answers/audio")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::from(vec![0u8; MAX_AUDIO_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
