// src/models/exam_session.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{exam_progress::AnswerRecord, question::PublicQuestion};

/// Lifecycle phase of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Active,
    Submitting,
    Submitted,
    Blocked,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Submitted | SessionPhase::Blocked)
    }

    /// Valid transitions; anything else is rejected.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Uninitialized, Loading)
                | (Uninitialized, Blocked)
                | (Loading, Active)
                | (Loading, Blocked)
                | (Loading, Uninitialized)
                | (Active, Submitting)
                | (Submitting, Submitted)
                | (Submitting, Active)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
    Skip,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub direction: Direction,
}

/// DTO for a text or choice answer to the current question.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[validate(length(max = 5000, message = "Answer must be at most 5000 characters."))]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnswerParams {
    /// How long the spoken prompt took to play.
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub hidden: bool,
}

/// What the exam page needs to render the current state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub question_index: usize,
    pub section_question_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<PublicQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_answer: Option<AnswerRecord>,
    pub answered_count: usize,
    pub total_questions: usize,
    pub remaining_seconds: i64,
    pub is_first_question: bool,
    pub is_last_question: bool,
    pub tab_change_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::SessionPhase::*;

    #[test]
    fn terminal_phases_have_no_exits() {
        for next in [Uninitialized, Loading, Active, Submitting, Submitted, Blocked] {
            assert!(!Submitted.can_transition_to(next));
            assert!(!Blocked.can_transition_to(next));
        }
    }

    #[test]
    fn submitting_only_from_active() {
        assert!(Active.can_transition_to(Submitting));
        assert!(!Loading.can_transition_to(Submitting));
        assert!(!Submitting.can_transition_to(Submitting));
        assert!(!Uninitialized.can_transition_to(Active));
    }
}
