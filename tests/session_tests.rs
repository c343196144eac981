// tests/session_tests.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use examertric::{
    config::ExamSettings,
    error::AppError,
    models::{
        exam_progress::ExamProgress,
        exam_session::{Direction, SessionPhase},
        question::QuestionBank,
        user::Principal,
    },
    services::{
        session::{FINISHED_RETENTION_SECS, SessionDeps, SessionRegistry, TickOutcome},
        transcription::{Transcriber, Transcription, TranscriptionError, TranscriptionMetadata},
    },
    store::{DocumentStore, DocumentStoreExt, MemoryBlobStore, MemoryStore, StoreError},
    utils::clock::ManualClock,
};
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};

/// Memory store whose reads or result writes can be made to fail, and whose
/// writes can be held until released.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_result_writes: AtomicBool,
    hold_writes: AtomicBool,
    held: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("network unavailable".to_string()));
        }
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        if self.hold_writes.load(Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
        }
        if path.starts_with("examResults/") && self.fail_result_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("PERMISSION_DENIED".to_string()));
        }
        self.inner.write(path, value).await
    }

    async fn push_create(&self, path: &str) -> Result<String, StoreError> {
        self.inner.push_create(path).await
    }
}

/// Transcriber that answers only once a permit is released.
struct GatedTranscriber {
    gate: Semaphore,
}

#[async_trait]
impl Transcriber for GatedTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        metadata: &TranscriptionMetadata,
    ) -> Result<Transcription, TranscriptionError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;
        Ok(Transcription {
            transcript: format!("spoken answer for {}", metadata.question_key),
            confidence: 0.9,
            is_correct: false,
        })
    }
}

struct Harness {
    store: Arc<FlakyStore>,
    clock: Arc<ManualClock>,
    transcriber: Arc<GatedTranscriber>,
    registry: SessionRegistry,
}

fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

fn harness() -> Harness {
    let store = Arc::new(FlakyStore::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let transcriber = Arc::new(GatedTranscriber {
        gate: Semaphore::new(0),
    });
    let registry = SessionRegistry::new(SessionDeps {
        store: store.clone(),
        blobs: Arc::new(MemoryBlobStore::new()),
        transcriber: transcriber.clone(),
        bank: Arc::new(QuestionBank::bundled().unwrap()),
        clock: clock.clone(),
        settings: ExamSettings::default(),
    });
    Harness {
        store,
        clock,
        transcriber,
        registry,
    }
}

fn taker(uid: &str) -> Principal {
    Principal {
        uid: uid.to_string(),
        email: Some(format!("{}@example.com", uid)),
        is_admin: false,
    }
}

async fn result_count(store: &FlakyStore, uid: &str) -> usize {
    match store.inner.read(&format!("examResults/{}", uid)).await.unwrap() {
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

async fn progress(store: &FlakyStore, uid: &str) -> Option<ExamProgress> {
    store
        .inner
        .read_as(&format!("examProgress/{}", uid))
        .await
        .unwrap()
}

#[tokio::test]
async fn new_session_persists_stable_sample() {
    let h = harness();
    let (_, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.total_questions, 22);
    assert_eq!(snapshot.remaining_seconds, 1200);

    let saved = progress(&h.store, "u1").await.unwrap();
    let selection = saved.selection().unwrap();
    assert_eq!(selection.written_question_ids.len(), 5);
    assert_eq!(selection.audio_question_ids.len(), 5);
    assert_eq!(saved.start_timestamp, Some(start_time().timestamp_millis()));
}

#[tokio::test]
async fn resume_restores_position_answers_and_sample() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    handle.save_text_answer("Paris".to_string()).await.unwrap();
    handle.save_text_answer("Mars".to_string()).await.unwrap();
    let before = progress(&h.store, "u1").await.unwrap();

    // A new registry over the same store stands in for a reload.
    h.clock.advance(Duration::minutes(3));
    let reloaded = SessionRegistry::new(h.registry.deps().clone());
    let (_, snapshot) = reloaded.open(&taker("u1")).await.unwrap();

    assert_eq!(snapshot.answered_count, 2);
    assert_eq!(snapshot.question_index, 2);
    assert_eq!(snapshot.section_id.as_deref(), Some("section1_standard"));
    assert_eq!(snapshot.remaining_seconds, 17 * 60);

    let after = progress(&h.store, "u1").await.unwrap();
    assert_eq!(after.selection(), before.selection());
    assert_eq!(after.start_timestamp, before.start_timestamp);
}

#[tokio::test]
async fn resume_without_sample_regenerates_and_clamps() {
    let h = harness();
    h.store
        .inner
        .write(
            "examProgress/u1",
            json!({
                "startTimestamp": start_time().timestamp_millis(),
                "currentSection": "section1_standard",
                "currentQuestionIndex": 9,
                "answers": {}
            }),
        )
        .await
        .unwrap();

    let (_, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.question_index, 4);
    assert!(progress(&h.store, "u1").await.unwrap().selection().is_some());
}

#[tokio::test]
async fn timer_submits_at_the_limit_not_before() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    handle.save_text_answer("Paris".to_string()).await.unwrap();

    h.clock.advance(Duration::minutes(19));
    assert_eq!(handle.tick().await, TickOutcome::Continue);
    assert_eq!(handle.phase().await, SessionPhase::Active);
    assert_eq!(result_count(&h.store, "u1").await, 0);

    h.clock.advance(Duration::minutes(1) + Duration::seconds(1));
    assert_eq!(handle.tick().await, TickOutcome::Stop);
    assert_eq!(handle.phase().await, SessionPhase::Submitted);
    assert_eq!(result_count(&h.store, "u1").await, 1);
    assert!(progress(&h.store, "u1").await.unwrap().submitted);

    // Further ticks do nothing.
    assert_eq!(handle.tick().await, TickOutcome::Stop);
    assert_eq!(result_count(&h.store, "u1").await, 1);
}

#[tokio::test]
async fn expired_attempt_is_submitted_on_load() {
    let h = harness();
    let started = start_time() - Duration::minutes(21);
    h.store
        .inner
        .write(
            "examProgress/u1",
            json!({
                "startTimestamp": started.timestamp_millis(),
                "currentSection": "section1_standard",
                "currentQuestionIndex": 0,
                "answers": {},
                "writtenQuestionIds": ["w1", "w2", "w3", "w4", "w5"],
                "audioQuestionIds": ["a1", "a2", "a3", "a4", "a5"]
            }),
        )
        .await
        .unwrap();

    let (_, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Submitted);
    assert!(snapshot.result_id.is_some());
    assert_eq!(result_count(&h.store, "u1").await, 1);
}

#[tokio::test]
async fn attempt_with_time_left_stays_active_on_load() {
    let h = harness();
    let started = start_time() - Duration::minutes(19);
    h.store
        .inner
        .write(
            "examProgress/u1",
            json!({
                "startTimestamp": started.timestamp_millis(),
                "currentSection": "section1_standard",
                "currentQuestionIndex": 0,
                "answers": {},
                "writtenQuestionIds": ["w1", "w2", "w3", "w4", "w5"],
                "audioQuestionIds": ["a1", "a2", "a3", "a4", "a5"]
            }),
        )
        .await
        .unwrap();

    let (handle, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.remaining_seconds, 60);
    assert_eq!(result_count(&h.store, "u1").await, 0);
    assert_eq!(handle.tick().await, TickOutcome::Continue);
}

#[tokio::test]
async fn racing_submits_append_one_result() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    h.clock.advance(Duration::minutes(25));

    let (manual, timer) = tokio::join!(handle.submit(true), handle.tick());
    let receipt = manual.unwrap();
    assert_eq!(timer, TickOutcome::Stop);
    assert_eq!(result_count(&h.store, "u1").await, 1);

    let again = h.registry.submit(&taker("u1"), true).await.unwrap();
    assert!(again.already_submitted);
    assert_eq!(again.result_id, receipt.result_id);
    assert_eq!(result_count(&h.store, "u1").await, 1);
}

#[tokio::test]
async fn failed_submit_stays_active_and_can_retry() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    handle.save_text_answer("Paris".to_string()).await.unwrap();

    h.store.fail_result_writes.store(true, Ordering::SeqCst);
    let err = handle.submit(true).await.unwrap_err();
    assert!(matches!(err, AppError::PersistenceFailed(_, _)));
    assert_eq!(handle.phase().await, SessionPhase::Active);
    assert!(!progress(&h.store, "u1").await.unwrap().submitted);

    h.store.fail_result_writes.store(false, Ordering::SeqCst);
    let receipt = handle.submit(true).await.unwrap();
    assert!(!receipt.already_submitted);
    assert_eq!(result_count(&h.store, "u1").await, 1);
}

#[tokio::test]
async fn load_failure_returns_to_uninitialized_and_retries() {
    let h = harness();
    h.store.fail_reads.store(true, Ordering::SeqCst);
    let err = h.registry.open(&taker("u1")).await.unwrap_err();
    assert!(matches!(err, AppError::PersistenceFailed(_, _)));

    h.store.fail_reads.store(false, Ordering::SeqCst);
    let (_, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
}

#[tokio::test]
async fn existing_result_blocks_without_creating_progress() {
    let h = harness();
    h.store
        .inner
        .write("examResults/u1/r1", json!({ "score": 40 }))
        .await
        .unwrap();

    for _ in 0..2 {
        let err = h.registry.open(&taker("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyCompleted));
    }
    assert!(progress(&h.store, "u1").await.is_none());
}

#[tokio::test]
async fn admins_cannot_take_the_exam() {
    let h = harness();
    let admin = Principal {
        is_admin: true,
        ..taker("boss")
    };
    assert!(matches!(
        h.registry.open(&admin).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(progress(&h.store, "boss").await.is_none());
}

async fn move_to_audio(handle: &examertric::services::session::SessionHandle) -> String {
    let mut snapshot = handle.snapshot().await;
    for _ in 0..11 {
        snapshot = handle.navigate(Direction::Skip).await.unwrap();
    }
    assert_eq!(snapshot.section_id.as_deref(), Some("section2_standard"));
    snapshot.question_key.unwrap()
}

#[tokio::test]
async fn transcript_lands_on_the_question_that_was_answered() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    let audio_key = move_to_audio(&handle).await;

    let saved = handle.save_audio_answer(vec![7; 16], Some(1800)).await.unwrap();
    assert_ne!(saved.snapshot.question_key.as_deref(), Some(audio_key.as_str()));

    // The user keeps going while transcription is pending.
    let current = handle.navigate(Direction::Next).await.unwrap().question_key.unwrap();

    h.transcriber.gate.add_permits(1);
    saved.transcription.unwrap().await.unwrap();

    let saved_progress = progress(&h.store, "u1").await.unwrap();
    let answer = &saved_progress.answers[&audio_key];
    assert_eq!(
        answer.text.as_deref(),
        Some(format!("spoken answer for {}", audio_key).as_str())
    );
    assert_eq!(answer.audio_question_duration_ms, Some(1800));
    assert!(answer.storage_path.as_deref().unwrap().starts_with(&format!("examAnswers/u1/{}/", audio_key)));
    assert!(!saved_progress.answers.contains_key(&current));
}

#[tokio::test]
async fn late_transcript_after_submit_is_dropped() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();
    move_to_audio(&handle).await;

    let saved = handle.save_audio_answer(vec![1, 2, 3], None).await.unwrap();
    handle.submit(true).await.unwrap();

    h.transcriber.gate.add_permits(1);
    saved.transcription.unwrap().await.unwrap();

    let stored = h.store.inner.read("examProgress/u1").await.unwrap();
    assert_eq!(stored, Some(ExamProgress::submitted_marker()));
}

#[tokio::test]
async fn tab_events_survive_until_submission() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();

    assert!(handle.record_visibility(true));
    h.clock.advance(Duration::seconds(4));
    assert!(handle.record_visibility(false));
    handle.save_text_answer("Paris".to_string()).await.unwrap();

    let saved = progress(&h.store, "u1").await.unwrap();
    assert_eq!(saved.tab_change_count, 1);
    assert_eq!(saved.tab_change_events[1].duration_hidden_ms, Some(4_000));

    handle.submit(true).await.unwrap();
    assert!(!handle.record_visibility(true));
}

#[tokio::test]
async fn written_questions_refuse_audio() {
    let h = harness();
    let (handle, snapshot) = h.registry.open(&taker("u1")).await.unwrap();
    assert_eq!(snapshot.section_id.as_deref(), Some("section1_standard"));

    let err = handle.save_audio_answer(vec![1, 2, 3], None).await.err().unwrap();
    assert!(matches!(err, AppError::ValidationFailed(_)));

    let after = handle.snapshot().await;
    assert_eq!(after.answered_count, 0);
    assert_eq!(after.question_key, snapshot.question_key);
    assert!(progress(&h.store, "u1").await.unwrap().answers.is_empty());
}

#[tokio::test]
async fn finished_sessions_are_evicted_after_retention() {
    let h = harness();
    for i in 0..5 {
        h.registry.submit(&taker(&format!("u{}", i)), true).await.unwrap();
    }
    assert_eq!(h.registry.registered_count().await, 5);
    assert_eq!(h.registry.active_count().await, 0);

    // Inside the window a repeat still gets its receipt.
    h.clock.advance(Duration::seconds(FINISHED_RETENTION_SECS - 1));
    assert_eq!(h.registry.sweep().await, 0);
    let again = h.registry.submit(&taker("u0"), true).await.unwrap();
    assert!(again.already_submitted);

    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.registry.sweep().await, 5);
    assert_eq!(h.registry.registered_count().await, 0);

    // Once evicted the stored result answers for the user.
    let err = h.registry.submit(&taker("u0"), true).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyCompleted));
    assert_eq!(h.registry.registered_count().await, 0);
    assert_eq!(result_count(&h.store, "u0").await, 1);
}

#[tokio::test]
async fn tab_events_are_recorded_while_a_save_is_in_flight() {
    let h = harness();
    let (handle, _) = h.registry.open(&taker("u1")).await.unwrap();

    h.store.hold_writes.store(true, Ordering::SeqCst);
    let saving = tokio::spawn({
        let handle = handle.clone();
        async move { handle.save_text_answer("Paris".to_string()).await }
    });
    while h.store.held.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // The save holds the session lock while its write is parked.
    let live = h.registry.live("u1").await.unwrap();
    assert!(live.record_visibility(true));
    assert_eq!(live.tab_change_count(), 1);

    h.store.hold_writes.store(false, Ordering::SeqCst);
    h.store.release.notify_one();
    saving.await.unwrap().unwrap();

    assert_eq!(handle.snapshot().await.tab_change_count, 1);
}
