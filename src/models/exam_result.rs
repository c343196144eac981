// src/models/exam_result.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::exam_progress::{AnswerRecord, TabChangeEvent};

/// Grading of one answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEntry {
    pub correct: bool,
    pub user_answer: String,
    #[serde(default)]
    pub expected_answers: Vec<String>,

    // Set once an administrator has reviewed the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mark: Option<f64>,
}

impl AnalysisEntry {
    pub fn graded(correct: bool, user_answer: String, expected_answers: Vec<String>) -> Self {
        Self {
            correct,
            user_answer,
            expected_answers,
            reviewer_id: None,
            reviewer_email: None,
            corrected_transcript: None,
            reviewed_at: None,
            mark: None,
            max_mark: None,
        }
    }
}

/// A submitted attempt, stored at `examResults/{uid}/{pushId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerRecord>,
    #[serde(default)]
    pub analysis: BTreeMap<String, AnalysisEntry>,
    /// Percentage, 0..=100.
    pub score: i64,
    pub correct_answers: usize,
    pub timestamp: DateTime<Utc>,
    /// Seconds between attempt start and submission.
    pub time_spent: i64,
    pub total_questions: usize,
    pub answered_count: usize,
    #[serde(default)]
    pub tab_change_events: Vec<TabChangeEvent>,
    #[serde(default)]
    pub tab_change_count: usize,
}

/// An `ExamResult` together with its push id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: String,
    #[serde(flatten)]
    pub result: ExamResult,
}

/// DTO for submitting an attempt.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExamRequest {
    /// Acknowledges that not every assigned question was answered.
    #[serde(default)]
    pub confirm_incomplete: bool,
}

/// Returned once an attempt has been submitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub result_id: String,
    pub score: i64,
    pub correct_answers: usize,
    pub answered_count: usize,
    pub total_questions: usize,
    pub time_spent: i64,
    /// `true` when this call found the attempt already submitted.
    pub already_submitted: bool,
}

/// One bucket of the score distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBucket {
    pub range: &'static str,
    pub count: usize,
}

/// Aggregate statistics over a user's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStats {
    pub total_exams: usize,
    pub average_score: f64,
    pub average_time_spent: i64,
    pub average_completion: f64,
    pub text_answers: usize,
    pub audio_answers: usize,
    pub score_distribution: Vec<ScoreBucket>,
}
