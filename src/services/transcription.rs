// src/services/transcription.rs

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// Context sent along with a recorded answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionMetadata {
    pub language_code: String,
    pub expected_answers: Vec<String>,
    pub question_key: String,
}

/// Result returned by the transcription service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug)]
pub enum TranscriptionError {
    /// No service is configured.
    Disabled,
    /// 401: bad or missing token.
    Unauthorized,
    /// 400: the service found no audio in the request.
    BadRequest(String),
    /// Any other failure.
    Failed(String),
}

impl fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionError::Disabled => write!(f, "transcription is not configured"),
            TranscriptionError::Unauthorized => write!(f, "transcription service rejected the token"),
            TranscriptionError::BadRequest(msg) => write!(f, "transcription request rejected: {}", msg),
            TranscriptionError::Failed(msg) => write!(f, "transcription failed: {}", msg),
        }
    }
}

impl std::error::Error for TranscriptionError {}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        metadata: &TranscriptionMetadata,
    ) -> Result<Transcription, TranscriptionError>;
}

/// Used when no transcription endpoint is configured. Every audio answer
/// then waits for manual review.
pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _metadata: &TranscriptionMetadata,
    ) -> Result<Transcription, TranscriptionError> {
        Err(TranscriptionError::Disabled)
    }
}

#[derive(Serialize)]
struct TranscriptionRequest<'a> {
    audio: String,
    metadata: &'a TranscriptionMetadata,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Client for the HTTP speech-to-text endpoint.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpTranscriber {
    pub fn new(endpoint: Url, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        metadata: &TranscriptionMetadata,
    ) -> Result<Transcription, TranscriptionError> {
        let body = TranscriptionRequest {
            audio: STANDARD.encode(audio),
            metadata,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Transcription>()
                .await
                .map_err(|e| TranscriptionError::Failed(e.to_string()));
        }

        // Prefer the service's own error message.
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    format!("Request failed: {}", status.as_u16())
                } else {
                    raw.clone()
                }
            });

        Err(match status {
            StatusCode::UNAUTHORIZED => TranscriptionError::Unauthorized,
            StatusCode::BAD_REQUEST => TranscriptionError::BadRequest(message),
            _ => TranscriptionError::Failed(message),
        })
    }
}
