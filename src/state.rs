// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::models::question::QuestionBank;
use crate::services::session::{SessionDeps, SessionRegistry};
use crate::services::transcription::Transcriber;
use crate::store::{BlobStore, DocumentStore};
use crate::utils::clock::Clock;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub bank: Arc<QuestionBank>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        transcriber: Arc<dyn Transcriber>,
        bank: Arc<QuestionBank>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let deps = SessionDeps {
            store: Arc::clone(&store),
            blobs,
            transcriber,
            bank: Arc::clone(&bank),
            clock,
            settings: config.exam.clone(),
        };
        Self {
            store,
            bank,
            sessions: Arc::new(SessionRegistry::new(deps)),
            config,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn DocumentStore> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.store)
    }
}

impl FromRef<AppState> for Arc<SessionRegistry> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.sessions)
    }
}
