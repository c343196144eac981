// src/models/exam_progress.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::review::ReviewRecord;

/// The answer given to one question of an attempt.
///
/// Exactly one of `text` / `audio_url` is set at creation. Audio answers may
/// gain `text` later once transcription succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub time_to_answer_ms: i64,
    #[serde(default)]
    pub question_displayed_at: DateTime<Utc>,
    #[serde(default)]
    pub answered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_question_duration_ms: Option<u64>,
    /// Administrator correction mirrored from `audioReviews`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewRecord>,
}

impl AnswerRecord {
    pub fn text(text: String, displayed_at: DateTime<Utc>, answered_at: DateTime<Utc>) -> Self {
        Self {
            text: Some(text),
            audio_url: None,
            storage_path: None,
            time_to_answer_ms: (answered_at - displayed_at).num_milliseconds().max(0),
            question_displayed_at: displayed_at,
            answered_at,
            audio_question_duration_ms: None,
            review: None,
        }
    }

    pub fn audio(
        audio_url: String,
        storage_path: String,
        displayed_at: DateTime<Utc>,
        answered_at: DateTime<Utc>,
        audio_question_duration_ms: Option<u64>,
    ) -> Self {
        Self {
            text: None,
            audio_url: Some(audio_url),
            storage_path: Some(storage_path),
            time_to_answer_ms: (answered_at - displayed_at).num_milliseconds().max(0),
            question_displayed_at: displayed_at,
            answered_at,
            audio_question_duration_ms,
            review: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.audio_url.is_some()
    }
}

/// One tab-visibility transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub was_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hidden_ms: Option<i64>,
}

/// Sampled question ids fixed for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSelection {
    pub written_question_ids: Vec<String>,
    pub audio_question_ids: Vec<String>,
}

/// Saved state of a user's in-progress attempt (`examProgress/{uid}`).
///
/// Overwritten in place on every save. After submission only
/// `{"submitted": true}` remains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProgress {
    /// Attempt start, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section: Option<String>,
    #[serde(default)]
    pub current_question_index: usize,
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerRecord>,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default)]
    pub tab_change_events: Vec<TabChangeEvent>,
    #[serde(default)]
    pub tab_change_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_question_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_question_ids: Option<Vec<String>>,
}

impl ExamProgress {
    /// The document left behind once an attempt has been submitted.
    pub fn submitted_marker() -> serde_json::Value {
        serde_json::json!({ "submitted": true })
    }

    /// Persisted sample, if both halves are present.
    pub fn selection(&self) -> Option<QuestionSelection> {
        match (&self.written_question_ids, &self.audio_question_ids) {
            (Some(written), Some(audio)) => Some(QuestionSelection {
                written_question_ids: written.clone(),
                audio_question_ids: audio.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submitted_marker_parses_as_progress() {
        let progress: ExamProgress =
            serde_json::from_value(ExamProgress::submitted_marker()).unwrap();
        assert!(progress.submitted);
        assert!(progress.answers.is_empty());
        assert!(progress.selection().is_none());
    }

    #[test]
    fn answer_record_uses_camel_case() {
        let displayed = DateTime::from_timestamp_millis(1_000).unwrap();
        let answered = DateTime::from_timestamp_millis(4_500).unwrap();
        let record = AnswerRecord::text("Paris".to_string(), displayed, answered);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["text"], json!("Paris"));
        assert_eq!(value["timeToAnswerMs"], json!(3_500));
        assert!(value.get("audioUrl").is_none());
        assert!(value["questionDisplayedAt"].as_str().unwrap().starts_with("1970-01-01T00:00:01"));
    }

    #[test]
    fn selection_requires_both_halves() {
        let progress = ExamProgress {
            written_question_ids: Some(vec!["w1".to_string()]),
            ..Default::default()
        };
        assert!(progress.selection().is_none());
    }
}
