// src/main.rs

use std::sync::Arc;

use dotenvy::dotenv;
use examertric::config::Config;
use examertric::models::question::QuestionBank;
use examertric::routes;
use examertric::services::accounts;
use examertric::services::transcription::{DisabledTranscriber, HttpTranscriber, Transcriber};
use examertric::state::AppState;
use examertric::store::{DocumentStore, LocalBlobStore, MemoryStore, PgStore};
use examertric::utils::clock::SystemClock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "examertric.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgStore::connect(url, 5)
                .await
                .expect("Failed to initialise the document store"),
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, documents are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let bank = match &config.question_bank_path {
        Some(path) => QuestionBank::from_path(path),
        None => QuestionBank::bundled(),
    }
    .expect("Failed to load the question bank");
    tracing::info!(
        sections = bank.sections.len(),
        "Question bank loaded: {}",
        bank.title
    );

    let transcriber: Arc<dyn Transcriber> = match &config.transcription_url {
        Some(url) => Arc::new(HttpTranscriber::new(
            url.clone(),
            config.transcription_token.clone(),
        )),
        None => {
            tracing::info!("TRANSCRIPTION_URL not set, audio answers wait for manual review");
            Arc::new(DisabledTranscriber)
        }
    };

    let blobs = Arc::new(LocalBlobStore::new(
        config.media_root.clone(),
        config.public_base_url.clone(),
    ));

    if let Err(e) = seed_admin_user(store.as_ref(), &config).await {
        tracing::error!("Failed to seed admin user: {}", e);
    }

    let state = AppState::new(
        config.clone(),
        store,
        blobs,
        transcriber,
        Arc::new(bank),
        Arc::new(SystemClock),
    );
    let sessions = Arc::clone(&state.sessions);

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind the listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    sessions.shutdown().await;
}

async fn seed_admin_user(
    store: &dyn DocumentStore,
    config: &Config,
) -> Result<(), examertric::error::AppError> {
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        let (mut account, created) = accounts::find_or_create(store, email, password).await?;
        if created || !account.admin {
            tracing::info!("Seeding admin user: {}", email);
            accounts::grant_admin(store, &mut account).await?;
        }
    }
    Ok(())
}
