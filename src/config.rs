// src/config.rs

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use dotenvy::dotenv;
use url::Url;

/// Tunables of the exam itself.
#[derive(Debug, Clone)]
pub struct ExamSettings {
    /// Wall-clock budget of one attempt.
    pub time_limit_secs: i64,
    pub written_sample_size: usize,
    pub audio_sample_size: usize,
    /// Language hint sent along with recorded answers.
    pub language_code: String,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: 20 * 60,
            written_sample_size: 5,
            audio_sample_size: 5,
            language_code: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// When unset the server keeps documents in memory.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub media_root: PathBuf,
    pub public_base_url: Url,
    pub question_bank_path: Option<PathBuf>,
    pub transcription_url: Option<Url>,
    pub transcription_token: Option<String>,
    pub exam: ExamSettings,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = optional("DATABASE_URL");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = parsed("JWT_EXPIRATION", 86_400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://127.0.0.1:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/".to_string());
        let public_base_url =
            Url::parse(&public_base_url).expect("PUBLIC_BASE_URL must be a valid URL");

        let transcription_url = optional("TRANSCRIPTION_URL")
            .map(|u| Url::parse(&u).expect("TRANSCRIPTION_URL must be a valid URL"));

        let defaults = ExamSettings::default();
        let exam = ExamSettings {
            time_limit_secs: parsed("EXAM_TIME_LIMIT_SECS", defaults.time_limit_secs),
            written_sample_size: parsed("WRITTEN_SAMPLE_SIZE", defaults.written_sample_size),
            audio_sample_size: parsed("AUDIO_SAMPLE_SIZE", defaults.audio_sample_size),
            language_code: env::var("TRANSCRIPTION_LANGUAGE").unwrap_or(defaults.language_code),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_addr,
            allowed_origins,
            admin_email: optional("ADMIN_EMAIL"),
            admin_password: optional("ADMIN_PASSWORD"),
            media_root: PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string())),
            public_base_url,
            question_bank_path: optional("QUESTION_BANK_PATH").map(PathBuf::from),
            transcription_url,
            transcription_token: optional("TRANSCRIPTION_TOKEN"),
            exam,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{} must be a valid number", key)),
        Err(_) => default,
    }
}
