// src/models/review.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Administrator correction of one audio answer.
///
/// Stored at `audioReviews/{uid}/{questionKey}` and mirrored into the live
/// progress answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub reviewer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
    pub corrected_transcript: String,
    pub is_correct: bool,
    pub reviewed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mark: Option<f64>,
}

/// DTO for an administrator review.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 256))]
    pub question_key: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub corrected_transcript: String,
    pub is_correct: bool,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub mark: Option<f64>,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub max_mark: Option<f64>,
}

/// One answer shown in the administrator review list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub user_id: String,
    pub question_key: String,
    /// `"progress"` for a live attempt or the result id it was submitted in.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub expected_answers: Vec<String>,
    pub reviewed: bool,
}

/// Outcome of propagating one review.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub review: Option<ReviewRecord>,
    pub progress_updated: bool,
    pub results_updated: Vec<String>,
    pub results_failed: Vec<String>,
}
