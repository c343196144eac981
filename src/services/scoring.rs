// src/services/scoring.rs

use std::collections::BTreeMap;

use crate::models::exam_progress::AnswerRecord;
use crate::models::exam_result::AnalysisEntry;
use crate::models::question::QuestionBank;

/// Placeholder answer text for audio answers awaiting manual review.
pub const AUDIO_RESPONSE: &str = "Audio response";

/// Output of [`score`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheet {
    pub correct_answers: usize,
    pub analysis: BTreeMap<String, AnalysisEntry>,
}

/// Lower-cases and trims an answer for comparison.
pub fn normalize(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Exact match of `answer` against any accepted answer, after normalization.
pub fn is_accepted(answer: &str, accepted_answers: &[String]) -> bool {
    let normalized = normalize(answer);
    accepted_answers.iter().any(|a| normalize(a) == normalized)
}

/// Grades every recorded answer.
///
/// Text answers are matched exactly against the accepted answers. Audio
/// answers without text are recorded as incorrect, pending manual review.
/// Keys that no longer resolve in the bank are skipped.
pub fn score(answers: &BTreeMap<String, AnswerRecord>, bank: &QuestionBank) -> ScoreSheet {
    let mut correct_answers = 0;
    let mut analysis = BTreeMap::new();

    for (key, answer) in answers {
        let Some((_, question)) = bank.resolve_key(key) else {
            tracing::error!(question_key = %key, "Answer references an unknown question, skipping");
            continue;
        };

        let entry = if let Some(text) = &answer.text {
            let correct = is_accepted(text, &question.accepted_answers);
            if correct {
                correct_answers += 1;
            }
            AnalysisEntry::graded(correct, text.clone(), question.accepted_answers.clone())
        } else if answer.audio_url.is_some() {
            AnalysisEntry::graded(
                false,
                AUDIO_RESPONSE.to_string(),
                question.accepted_answers.clone(),
            )
        } else {
            tracing::warn!(question_key = %key, "Answer has neither text nor audio, skipping");
            continue;
        };

        analysis.insert(key.clone(), entry);
    }

    ScoreSheet {
        correct_answers,
        analysis,
    }
}

/// Percentage over answered questions; 0 when nothing was answered.
pub fn score_percentage(correct_answers: usize, answered_count: usize) -> i64 {
    if answered_count == 0 {
        return 0;
    }
    (correct_answers as f64 / answered_count as f64 * 100.0).round() as i64
}

/// Recomputes `(score, correct_answers)` of a result from its analysis.
///
/// Reviewed entries contribute `mark / max_mark`; others contribute 1 if
/// correct out of 1.
pub fn aggregate<'a, I>(entries: I) -> (i64, usize)
where
    I: IntoIterator<Item = &'a AnalysisEntry>,
{
    let mut sum_marks = 0.0;
    let mut sum_max = 0.0;
    let mut correct = 0;

    for entry in entries {
        sum_marks += entry
            .mark
            .unwrap_or(if entry.correct { 1.0 } else { 0.0 });
        sum_max += entry.max_mark.unwrap_or(1.0);
        if entry.mark.is_some_and(|m| m > 0.0) || entry.correct {
            correct += 1;
        }
    }

    let score = if sum_max > 0.0 {
        (sum_marks / sum_max * 100.0).round() as i64
    } else {
        0
    };
    (score, correct)
}
