// src/services/reconcile.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::exam_progress::AnswerRecord;
use crate::models::exam_result::AnalysisEntry;
use crate::models::review::{ReviewOutcome, ReviewRecord, ReviewRequest};
use crate::models::user::Principal;
use crate::services::scoring::{self, AUDIO_RESPONSE};
use crate::services::session::{SessionHandle, SessionRegistry};
use crate::services::transcription::{Transcriber, TranscriptionMetadata};
use crate::store::{DocumentStore, DocumentStoreExt, StoreError, paths};
use crate::utils::html::clean_html;

/// Everything needed to transcribe one recorded answer, captured when the
/// answer was saved.
pub struct TranscriptionJob {
    pub question_key: String,
    pub storage_path: String,
    pub audio: Vec<u8>,
    pub metadata: TranscriptionMetadata,
}

/// Runs transcription in the background and merges the transcript into the
/// answer recorded for `job.question_key`.
///
/// Failures leave the answer without text; it then waits for manual review.
pub fn spawn_auto_transcription(
    session: Arc<SessionHandle>,
    transcriber: Arc<dyn Transcriber>,
    job: TranscriptionJob,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let uid = session.uid().to_string();
        match transcriber.transcribe(&job.audio, &job.metadata).await {
            Ok(t) if !t.transcript.trim().is_empty() => {
                let attached = session
                    .attach_transcript(&job.question_key, &job.storage_path, t.transcript)
                    .await;
                tracing::info!(
                    uid = %uid,
                    question_key = %job.question_key,
                    confidence = t.confidence,
                    attached,
                    "Transcription finished"
                );
            }
            Ok(_) => {
                tracing::info!(uid = %uid, question_key = %job.question_key, "Empty transcript, left for manual review");
            }
            Err(e) => {
                tracing::info!(
                    uid = %uid,
                    question_key = %job.question_key,
                    reason = %e,
                    "Transcription unavailable, left for manual review"
                );
            }
        }
    })
}

fn answer_text(answer: &AnswerRecord) -> String {
    match &answer.text {
        Some(text) => text.clone(),
        None if answer.is_audio() => AUDIO_RESPONSE.to_string(),
        None => String::new(),
    }
}

/// Records an administrator correction and propagates it.
///
/// The review is written to `audioReviews`, mirrored into the live progress
/// answer when there is one, and projected into every submitted result that
/// answered the question. Each result is recomputed from its freshly written
/// analysis; a failure on one result does not stop the others.
pub async fn apply_review(
    registry: &SessionRegistry,
    reviewer: &Principal,
    request: ReviewRequest,
) -> Result<ReviewOutcome, AppError> {
    let deps = registry.deps();
    let store = Arc::clone(&deps.store);
    let uid = request.user_id.as_str();
    let key = request.question_key.as_str();

    let progress_path = format!("{}/answers/{}", paths::exam_progress(uid), key);
    let progress_answer: Option<AnswerRecord> = store.read_as(&progress_path).await?;

    let results_root = paths::exam_results(uid);
    let results = store
        .read(&results_root)
        .await?
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let answered_in: Vec<(String, AnswerRecord, Option<AnalysisEntry>)> = results
        .iter()
        .filter_map(|(result_id, result)| {
            let (answer, analysis) = answer_in_result(uid, result_id, result, key)?;
            Some((result_id.clone(), answer, analysis))
        })
        .collect();

    let source_answer = progress_answer
        .as_ref()
        .or_else(|| answered_in.first().map(|(_, answer, _)| answer));
    let Some(source_answer) = source_answer else {
        return Err(AppError::NotFound(format!(
            "No answer for '{}' by user '{}'",
            key, uid
        )));
    };

    let review = ReviewRecord {
        reviewer_id: reviewer.uid.clone(),
        reviewer_email: reviewer.email.clone(),
        corrected_transcript: clean_html(request.corrected_transcript.trim()),
        is_correct: request.is_correct,
        reviewed_at: deps.clock.now(),
        audio_url: source_answer.audio_url.clone(),
        storage_path: source_answer.storage_path.clone(),
        mark: request.mark,
        max_mark: request.max_mark,
    };

    store
        .write_as(&format!("{}/{}", paths::audio_reviews(uid), key), &review)
        .await?;
    tracing::info!(uid = %uid, question_key = %key, reviewer = %reviewer.uid, "Review recorded");

    let mut outcome = ReviewOutcome {
        review: Some(review.clone()),
        ..ReviewOutcome::default()
    };

    if progress_answer.is_some() {
        outcome.progress_updated = match registry.live(uid).await {
            Some(session) => session.attach_review(key, review.clone()).await,
            None => false,
        };
        if !outcome.progress_updated {
            match store.write_as(&format!("{}/review", progress_path), &review).await {
                Ok(()) => outcome.progress_updated = true,
                Err(e) => {
                    tracing::warn!(uid = %uid, question_key = %key, error = %e, "Failed to mirror review into progress");
                }
            }
        }
    }

    let expected_fallback = deps
        .bank
        .resolve_key(key)
        .map(|(_, q)| q.accepted_answers.clone())
        .unwrap_or_default();

    for (result_id, answer, previous) in answered_in {
        let entry = AnalysisEntry {
            correct: review.is_correct,
            user_answer: previous
                .as_ref()
                .map(|p| p.user_answer.clone())
                .unwrap_or_else(|| answer_text(&answer)),
            expected_answers: previous
                .map(|p| p.expected_answers)
                .unwrap_or_else(|| expected_fallback.clone()),
            reviewer_id: Some(review.reviewer_id.clone()),
            reviewer_email: review.reviewer_email.clone(),
            corrected_transcript: Some(review.corrected_transcript.clone()),
            reviewed_at: Some(review.reviewed_at),
            mark: review.mark,
            max_mark: review.max_mark,
        };

        let result_path = format!("{}/{}", results_root, result_id);
        match reconcile_result(store.as_ref(), &result_path, key, &entry).await {
            Ok((score, correct)) => {
                tracing::info!(uid = %uid, result_id = %result_id, score, correct, "Result recomputed after review");
                outcome.results_updated.push(result_id);
            }
            Err(e) => {
                tracing::error!(uid = %uid, result_id = %result_id, error = %e, "Failed to reconcile result");
                outcome.results_failed.push(result_id);
            }
        }
    }

    Ok(outcome)
}

/// Writes one analysis entry, then recomputes the result's aggregate from
/// the analysis as stored after that write.
async fn reconcile_result(
    store: &dyn DocumentStore,
    result_path: &str,
    key: &str,
    entry: &AnalysisEntry,
) -> Result<(i64, usize), StoreError> {
    let analysis_path = format!("{}/analysis", result_path);
    store
        .write_as(&format!("{}/{}", analysis_path, key), entry)
        .await?;

    let analysis: BTreeMap<String, AnalysisEntry> =
        store.read_as(&analysis_path).await?.unwrap_or_default();
    let (score, correct) = scoring::aggregate(analysis.values());

    store
        .write(&format!("{}/score", result_path), Value::from(score))
        .await?;
    store
        .write(&format!("{}/correctAnswers", result_path), Value::from(correct))
        .await?;
    Ok((score, correct))
}

/// The answer stored under `key` in one result, with its analysis entry.
///
/// An answer that cannot be read is logged and treated as absent.
fn answer_in_result(
    uid: &str,
    result_id: &str,
    result: &Value,
    key: &str,
) -> Option<(AnswerRecord, Option<AnalysisEntry>)> {
    let raw = result.get("answers")?.get(key)?;
    let answer = match serde_json::from_value::<AnswerRecord>(raw.clone()) {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(
                uid = %uid,
                result_id = %result_id,
                question_key = %key,
                error = %e,
                "Skipping unreadable answer in result"
            );
            return None;
        }
    };
    let analysis = result
        .get("analysis")
        .and_then(|a| a.get(key))
        .and_then(|a| serde_json::from_value(a.clone()).ok());
    Some((answer, analysis))
}
