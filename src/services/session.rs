// src/services/session.rs
//
// Exam attempt state machine. One `SessionHandle` per user serialises every
// operation (user actions, the one-second timer, background transcripts)
// behind a single async lock; phase changes go through `transition`, which
// rejects anything not listed in `SessionPhase::can_transition_to`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ExamSettings;
use crate::error::AppError;
use crate::models::exam_progress::{AnswerRecord, ExamProgress, QuestionSelection};
use crate::models::exam_result::{ExamResult, SubmissionReceipt};
use crate::models::exam_session::{Direction, SessionPhase, SessionSnapshot};
use crate::models::question::{
    PublicQuestion, Question, QuestionBank, QuestionType, SamplingGroup, question_key,
};
use crate::models::review::ReviewRecord;
use crate::models::user::Principal;
use crate::services::reconcile::{self, TranscriptionJob};
use crate::services::sampler;
use crate::services::scoring;
use crate::services::transcription::{Transcriber, TranscriptionMetadata};
use crate::services::visibility::TabActivityLog;
use crate::store::{BlobStore, DocumentStore, DocumentStoreExt, StoreError, paths};
use crate::utils::clock::Clock;

/// Collaborators injected into every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub bank: Arc<QuestionBank>,
    pub clock: Arc<dyn Clock>,
    pub settings: ExamSettings,
}

/// Why a submission was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Explicit submit. Requires confirmation when questions are unanswered.
    Manual { confirm_incomplete: bool },
    /// Time limit reached. Never asks for confirmation.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Result of saving an audio answer.
pub struct AudioSaved {
    pub snapshot: SessionSnapshot,
    /// Background transcription, if one was started. Dropping it does not cancel it.
    pub transcription: Option<JoinHandle<()>>,
}

/// Question ids shown in one section for this attempt.
#[derive(Debug, Clone)]
struct SectionLayout {
    id: String,
    title: String,
    question_ids: Vec<String>,
}

fn build_layout(bank: &QuestionBank, selection: &QuestionSelection) -> Vec<SectionLayout> {
    bank.sections
        .iter()
        .map(|section| {
            let question_ids = match section.sample {
                Some(group) => {
                    let sampled = match group {
                        SamplingGroup::Written => &selection.written_question_ids,
                        SamplingGroup::Audio => &selection.audio_question_ids,
                    };
                    sampled
                        .iter()
                        .filter(|id| section.question(id).is_some())
                        .cloned()
                        .collect()
                }
                None => section.question_ids(),
            };
            SectionLayout {
                id: section.id.clone(),
                title: section.title.clone(),
                question_ids,
            }
        })
        .filter(|s| !s.question_ids.is_empty())
        .collect()
}

/// How long a finished session stays registered. A repeated submit inside
/// this window gets the original receipt back; afterwards it gets
/// `AlreadyCompleted` from the stored result.
pub const FINISHED_RETENTION_SECS: i64 = 300;

/// Epoch millis at which the attempt reached a terminal phase, 0 while running.
#[derive(Debug, Default)]
struct FinishedAt(AtomicI64);

impl FinishedAt {
    fn mark(&self, at: DateTime<Utc>) {
        let _ = self.0.compare_exchange(
            0,
            at.timestamp_millis().max(1),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn get(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// Where an answer will be recorded, captured when the answer was given.
#[derive(Debug, Clone)]
struct AnswerTarget {
    key: String,
    expected_answers: Vec<String>,
    displayed_at: DateTime<Utc>,
}

/// State of one user's attempt. Only reachable through [`SessionHandle`].
pub struct ExamSession {
    principal: Principal,
    deps: SessionDeps,
    phase: SessionPhase,
    layout: Vec<SectionLayout>,
    selection: Option<QuestionSelection>,
    started_at: DateTime<Utc>,
    section_index: usize,
    question_index: usize,
    answers: BTreeMap<String, AnswerRecord>,
    displayed_at: DateTime<Utc>,
    receipt: Option<SubmissionReceipt>,
    tabs: Arc<StdMutex<TabActivityLog>>,
    finished: Arc<FinishedAt>,
}

impl ExamSession {
    fn new(
        principal: Principal,
        deps: SessionDeps,
        tabs: Arc<StdMutex<TabActivityLog>>,
        finished: Arc<FinishedAt>,
    ) -> Self {
        let now = deps.clock.now();
        Self {
            principal,
            deps,
            phase: SessionPhase::Uninitialized,
            layout: Vec::new(),
            selection: None,
            started_at: now,
            section_index: 0,
            question_index: 0,
            answers: BTreeMap::new(),
            displayed_at: now,
            receipt: None,
            tabs,
            finished,
        }
    }

    fn uid(&self) -> &str {
        &self.principal.uid
    }

    fn tabs(&self) -> MutexGuard<'_, TabActivityLog> {
        self.tabs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&mut self, next: SessionPhase) -> Result<(), AppError> {
        if !self.phase.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        tracing::debug!(uid = %self.principal.uid, from = ?self.phase, to = ?next, "Session transition");
        self.phase = next;
        if next.is_terminal() {
            self.finished.mark(self.deps.clock.now());
            self.tabs().close();
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(), AppError> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            SessionPhase::Submitted | SessionPhase::Blocked => Err(AppError::AlreadyCompleted),
            other => Err(AppError::InvalidTransition(format!(
                "session is not active ({:?})",
                other
            ))),
        }
    }

    // ---- loading -------------------------------------------------------

    async fn mount(&mut self) -> Result<(), AppError> {
        if self.phase != SessionPhase::Uninitialized {
            return Ok(());
        }
        if self.principal.is_admin {
            return Err(AppError::Forbidden(
                "Administrators cannot take the exam.".to_string(),
            ));
        }

        self.transition(SessionPhase::Loading)?;
        if let Err(e) = self.load().await {
            tracing::error!(uid = %self.principal.uid, error = %e, "Failed to load exam session");
            self.transition(SessionPhase::Uninitialized)?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        let store = Arc::clone(&self.deps.store);

        let results = store.read(&paths::exam_results(self.uid())).await?;
        if results.as_ref().and_then(|r| r.as_object()).is_some_and(|m| !m.is_empty()) {
            tracing::info!(uid = %self.principal.uid, "Exam already has a result, blocking");
            self.block();
            return Ok(());
        }

        let progress: Option<ExamProgress> =
            store.read_as(&paths::exam_progress(self.uid())).await?;

        match progress {
            Some(p) if p.submitted => {
                tracing::info!(uid = %self.principal.uid, "Exam progress marked submitted, blocking");
                self.block();
                Ok(())
            }
            Some(p) => self.restore(p).await,
            None => self.create().await,
        }
    }

    fn block(&mut self) {
        // Loading -> Blocked is always valid.
        let _ = self.transition(SessionPhase::Blocked);
    }

    async fn restore(&mut self, progress: ExamProgress) -> Result<(), StoreError> {
        let now = self.deps.clock.now();

        let (selection, regenerated) = match progress.selection() {
            Some(selection) => (selection, false),
            None => {
                tracing::warn!(
                    uid = %self.principal.uid,
                    "Saved progress has no question sample, drawing a new one"
                );
                (self.draw_selection(), true)
            }
        };

        self.layout = build_layout(&self.deps.bank, &selection);
        self.selection = Some(selection);

        self.started_at = match progress.start_timestamp.and_then(DateTime::from_timestamp_millis) {
            Some(start) => start,
            None => {
                tracing::warn!(uid = %self.principal.uid, "Saved progress has no start time, using now");
                now
            }
        };

        self.section_index = progress
            .current_section
            .as_deref()
            .and_then(|id| self.layout.iter().position(|s| s.id == id))
            .unwrap_or(0);
        let section_len = self.current_section().map_or(1, |s| s.question_ids.len());
        self.question_index = progress.current_question_index.min(section_len.saturating_sub(1));

        self.answers = progress.answers;
        self.tabs().restore(progress.tab_change_events);
        self.displayed_at = now;

        let _ = self.transition(SessionPhase::Active);
        tracing::info!(
            uid = %self.principal.uid,
            answered = self.answers.len(),
            section = ?self.current_section().map(|s| s.id.clone()),
            index = self.question_index,
            "Exam session resumed"
        );

        if regenerated {
            self.persist_logged().await;
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), StoreError> {
        let now = self.deps.clock.now();
        let selection = self.draw_selection();

        self.layout = build_layout(&self.deps.bank, &selection);
        self.selection = Some(selection);
        self.started_at = now;
        self.section_index = 0;
        self.question_index = 0;
        self.answers.clear();
        self.displayed_at = now;

        self.persist().await?;
        let _ = self.transition(SessionPhase::Active);
        tracing::info!(uid = %self.principal.uid, "Exam session started");
        Ok(())
    }

    fn draw_selection(&self) -> QuestionSelection {
        let mut rng = rand::rng();
        sampler::generate_selection(&self.deps.bank, &self.deps.settings, &mut rng)
    }

    // ---- persistence ---------------------------------------------------

    fn to_progress(&self) -> ExamProgress {
        let tabs = self.tabs();
        ExamProgress {
            start_timestamp: Some(self.started_at.timestamp_millis()),
            current_section: self.current_section().map(|s| s.id.clone()),
            current_question_index: self.question_index,
            answers: self.answers.clone(),
            submitted: false,
            tab_change_events: tabs.events().to_vec(),
            tab_change_count: tabs.change_count(),
            written_question_ids: self.selection.as_ref().map(|s| s.written_question_ids.clone()),
            audio_question_ids: self.selection.as_ref().map(|s| s.audio_question_ids.clone()),
        }
    }

    /// Overwrites the whole progress document.
    async fn persist(&self) -> Result<(), StoreError> {
        let progress = self.to_progress();
        self.deps
            .store
            .write_as(&paths::exam_progress(self.uid()), &progress)
            .await
    }

    /// Saves progress; a failure keeps the in-memory state and is only logged.
    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!(uid = %self.principal.uid, error = %e, "Failed to save exam progress");
        }
    }

    // ---- position ------------------------------------------------------

    fn current_section(&self) -> Option<&SectionLayout> {
        self.layout.get(self.section_index)
    }

    fn current_key(&self) -> Option<String> {
        let section = self.current_section()?;
        let question_id = section.question_ids.get(self.question_index)?;
        Some(question_key(&section.id, question_id))
    }

    fn current_question(&self) -> Option<&Question> {
        let section = self.current_section()?;
        let question_id = section.question_ids.get(self.question_index)?;
        self.deps.bank.section(&section.id)?.question(question_id)
    }

    fn is_first_question(&self) -> bool {
        self.section_index == 0 && self.question_index == 0
    }

    fn is_last_question(&self) -> bool {
        match self.current_section() {
            Some(section) => {
                self.section_index + 1 >= self.layout.len()
                    && self.question_index + 1 >= section.question_ids.len()
            }
            None => true,
        }
    }

    fn move_next(&mut self) -> bool {
        let Some(section) = self.current_section() else {
            return false;
        };
        if self.question_index + 1 < section.question_ids.len() {
            self.question_index += 1;
        } else if self.section_index + 1 < self.layout.len() {
            self.section_index += 1;
            self.question_index = 0;
        } else {
            return false;
        }
        self.displayed_at = self.deps.clock.now();
        true
    }

    fn move_previous(&mut self) -> bool {
        if self.question_index > 0 {
            self.question_index -= 1;
        } else if self.section_index > 0 {
            self.section_index -= 1;
            self.question_index = self
                .current_section()
                .map_or(0, |s| s.question_ids.len().saturating_sub(1));
        } else {
            return false;
        }
        self.displayed_at = self.deps.clock.now();
        true
    }

    async fn navigate(&mut self, direction: Direction) -> Result<(), AppError> {
        self.require_active()?;
        let moved = match direction {
            Direction::Next | Direction::Skip => self.move_next(),
            Direction::Previous => self.move_previous(),
        };
        if moved {
            self.persist_logged().await;
        }
        Ok(())
    }

    // ---- answers -------------------------------------------------------

    fn answer_target(&self) -> Result<(AnswerTarget, QuestionType), AppError> {
        let key = self
            .current_key()
            .ok_or_else(|| AppError::NotFound("No current question".to_string()))?;
        let question = self
            .current_question()
            .ok_or_else(|| AppError::NotFound(format!("Question '{}' not found", key)))?;
        Ok((
            AnswerTarget {
                key,
                expected_answers: question.accepted_answers.clone(),
                displayed_at: self.displayed_at,
            },
            question.question_type,
        ))
    }

    async fn save_text_answer(&mut self, text: String) -> Result<(), AppError> {
        self.require_active()?;
        let (target, question_type) = self.answer_target()?;
        validate_text_answer(question_type, &text)?;

        let now = self.deps.clock.now();
        self.answers.insert(
            target.key.clone(),
            AnswerRecord::text(text, target.displayed_at, now),
        );
        tracing::debug!(uid = %self.principal.uid, question_key = %target.key, "Text answer saved");

        self.move_next();
        self.persist_logged().await;
        Ok(())
    }

    async fn record_audio_answer(
        &mut self,
        target: &AnswerTarget,
        audio_url: String,
        storage_path: String,
        duration_ms: Option<u64>,
    ) -> Result<(), AppError> {
        self.require_active()?;
        let now = self.deps.clock.now();
        self.answers.insert(
            target.key.clone(),
            AnswerRecord::audio(audio_url, storage_path, target.displayed_at, now, duration_ms),
        );
        tracing::debug!(uid = %self.principal.uid, question_key = %target.key, "Audio answer saved");

        // The user may have moved on while the upload was running.
        if self.current_key().as_deref() == Some(target.key.as_str()) {
            self.move_next();
        }
        self.persist_logged().await;
        Ok(())
    }

    /// Merges a transcript into the audio answer recorded at `key`.
    async fn attach_transcript(&mut self, key: &str, storage_path: &str, transcript: String) -> bool {
        if self.phase != SessionPhase::Active {
            tracing::info!(
                uid = %self.principal.uid,
                question_key = %key,
                phase = ?self.phase,
                "Transcript arrived after the attempt ended, dropping"
            );
            return false;
        }

        let Some(answer) = self.answers.get_mut(key) else {
            return false;
        };
        // A newer recording replaced the one that was transcribed.
        if answer.storage_path.as_deref() != Some(storage_path) {
            return false;
        }
        answer.text = Some(transcript);
        self.persist_logged().await;
        true
    }

    /// Mirrors an administrator review into the live answer at `key`.
    async fn attach_review(&mut self, key: &str, review: ReviewRecord) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        let Some(answer) = self.answers.get_mut(key) else {
            return false;
        };
        answer.review = Some(review);
        self.persist().await.is_ok()
    }

    // ---- timing --------------------------------------------------------

    fn elapsed_ms(&self) -> i64 {
        (self.deps.clock.now() - self.started_at).num_milliseconds()
    }

    fn is_expired(&self) -> bool {
        self.elapsed_ms() >= self.deps.settings.time_limit_secs * 1000
    }

    fn remaining_seconds(&self) -> i64 {
        let remaining_ms = self.deps.settings.time_limit_secs * 1000 - self.elapsed_ms();
        (remaining_ms.max(0) + 999) / 1000
    }

    fn total_questions(&self) -> usize {
        self.layout.iter().map(|s| s.question_ids.len()).sum()
    }

    // ---- submission ----------------------------------------------------

    async fn submit(&mut self, mode: SubmitMode) -> Result<SubmissionReceipt, AppError> {
        match self.phase {
            SessionPhase::Submitted => {
                if let Some(receipt) = &self.receipt {
                    return Ok(SubmissionReceipt {
                        already_submitted: true,
                        ..receipt.clone()
                    });
                }
                return Err(AppError::AlreadyCompleted);
            }
            SessionPhase::Blocked => return Err(AppError::AlreadyCompleted),
            SessionPhase::Active => {}
            other => {
                return Err(AppError::InvalidTransition(format!(
                    "cannot submit while {:?}",
                    other
                )));
            }
        }

        let answered = self.answers.len();
        let total = self.total_questions();
        if matches!(mode, SubmitMode::Manual { confirm_incomplete: false }) && answered < total {
            return Err(AppError::IncompleteSubmission { answered, total });
        }

        self.transition(SessionPhase::Submitting)?;

        let receipt = match self.append_result().await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(uid = %self.principal.uid, error = %e, "Failed to save exam result");
                self.transition(SessionPhase::Active)?;
                return Err(e.into());
            }
        };

        // The result exists now; a failure here still leaves the user blocked
        // on the next visit because a result is present.
        if let Err(e) = self
            .deps
            .store
            .write(&paths::exam_progress(self.uid()), ExamProgress::submitted_marker())
            .await
        {
            tracing::error!(uid = %self.principal.uid, error = %e, "Failed to mark progress submitted");
        }

        self.receipt = Some(receipt.clone());
        self.transition(SessionPhase::Submitted)?;
        tracing::info!(
            uid = %self.principal.uid,
            result_id = %receipt.result_id,
            score = receipt.score,
            answered = receipt.answered_count,
            mode = ?mode,
            "Exam submitted"
        );
        Ok(receipt)
    }

    async fn append_result(&self) -> Result<SubmissionReceipt, StoreError> {
        let now = self.deps.clock.now();
        let sheet = scoring::score(&self.answers, &self.deps.bank);
        let answered_count = self.answers.len();
        let score = scoring::score_percentage(sheet.correct_answers, answered_count);
        let (tab_change_events, tab_change_count) = {
            let tabs = self.tabs();
            (tabs.events().to_vec(), tabs.change_count())
        };

        let result = ExamResult {
            user_id: self.principal.uid.clone(),
            email: self.principal.email.clone(),
            answers: self.answers.clone(),
            analysis: sheet.analysis,
            score,
            correct_answers: sheet.correct_answers,
            timestamp: now,
            time_spent: (now - self.started_at).num_seconds().max(0),
            total_questions: self.total_questions(),
            answered_count,
            tab_change_events,
            tab_change_count,
        };

        let path = self.deps.store.push_create(&paths::exam_results(self.uid())).await?;
        self.deps.store.write_as(&path, &result).await?;

        let result_id = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
        Ok(SubmissionReceipt {
            result_id,
            score: result.score,
            correct_answers: result.correct_answers,
            answered_count: result.answered_count,
            total_questions: result.total_questions,
            time_spent: result.time_spent,
            already_submitted: false,
        })
    }

    // ---- view ----------------------------------------------------------

    fn snapshot(&self) -> SessionSnapshot {
        let section = self.current_section();
        let key = self.current_key();
        let active = matches!(self.phase, SessionPhase::Active | SessionPhase::Submitting);

        SessionSnapshot {
            phase: self.phase,
            section_id: section.map(|s| s.id.clone()),
            section_title: section.map(|s| s.title.clone()),
            question_index: self.question_index,
            section_question_count: section.map_or(0, |s| s.question_ids.len()),
            question: if active { self.current_question().map(PublicQuestion::from) } else { None },
            current_answer: key.as_ref().and_then(|k| self.answers.get(k)).cloned(),
            question_key: key,
            answered_count: self.answers.len(),
            total_questions: self.total_questions(),
            remaining_seconds: if active { self.remaining_seconds() } else { 0 },
            is_first_question: self.is_first_question(),
            is_last_question: self.is_last_question(),
            tab_change_count: self.tabs().change_count(),
            result_id: self.receipt.as_ref().map(|r| r.result_id.clone()),
        }
    }
}

/// Checks a text or choice answer before it is recorded.
pub fn validate_text_answer(question_type: QuestionType, text: &str) -> Result<(), AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationFailed(
            "Please provide an answer before continuing.".to_string(),
        ));
    }
    if question_type == QuestionType::Audio {
        return Err(AppError::ValidationFailed(
            "This question expects a spoken answer.".to_string(),
        ));
    }
    if question_type == QuestionType::Multiple {
        let chose_other = trimmed.eq_ignore_ascii_case("other")
            || trimmed
                .split_once(':')
                .is_some_and(|(label, rest)| {
                    label.trim().eq_ignore_ascii_case("other") && rest.trim().is_empty()
                });
        if chose_other {
            return Err(AppError::ValidationFailed(
                "Please describe your 'Other' answer.".to_string(),
            ));
        }
    }
    Ok(())
}

/// Shared handle to one user's session.
pub struct SessionHandle {
    uid: String,
    session: Mutex<ExamSession>,
    tabs: Arc<StdMutex<TabActivityLog>>,
    finished: Arc<FinishedAt>,
    timer: StdMutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
    transcriber: Arc<dyn Transcriber>,
    blobs: Arc<dyn BlobStore>,
    language_code: String,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn new(principal: Principal, deps: SessionDeps) -> Arc<Self> {
        let tabs = Arc::new(StdMutex::new(TabActivityLog::new()));
        let finished = Arc::new(FinishedAt::default());
        Arc::new(Self {
            uid: principal.uid.clone(),
            clock: Arc::clone(&deps.clock),
            transcriber: Arc::clone(&deps.transcriber),
            blobs: Arc::clone(&deps.blobs),
            language_code: deps.settings.language_code.clone(),
            session: Mutex::new(ExamSession::new(
                principal,
                deps,
                Arc::clone(&tabs),
                Arc::clone(&finished),
            )),
            tabs,
            finished,
            timer: StdMutex::new(None),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `true` once the attempt reached `Submitted` or `Blocked`.
    pub fn is_finished(&self) -> bool {
        self.finished.get().is_some()
    }

    /// When the attempt reached `Submitted` or `Blocked`.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished.get()
    }

    /// Loads or creates the attempt.
    ///
    /// Fails with `AlreadyCompleted` when the user may not start an attempt.
    /// If the saved attempt has already run out of time it is submitted
    /// right away.
    pub async fn mount(self: &Arc<Self>) -> Result<SessionSnapshot, AppError> {
        let mut session = self.session.lock().await;
        session.mount().await?;

        if session.phase == SessionPhase::Active {
            if session.is_expired() {
                tracing::info!(uid = %self.uid, "Time limit already spent, auto-submitting");
                if let Err(e) = session.submit(SubmitMode::Timeout).await {
                    tracing::error!(uid = %self.uid, error = %e, "Auto-submit on load failed");
                    self.start_timer();
                }
            } else {
                self.start_timer();
            }
        }

        match session.phase {
            SessionPhase::Blocked => Err(AppError::AlreadyCompleted),
            _ => Ok(session.snapshot()),
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.lock().await.phase
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    pub async fn navigate(&self, direction: Direction) -> Result<SessionSnapshot, AppError> {
        let mut session = self.session.lock().await;
        session.navigate(direction).await?;
        Ok(session.snapshot())
    }

    pub async fn save_text_answer(&self, text: String) -> Result<SessionSnapshot, AppError> {
        let mut session = self.session.lock().await;
        session.save_text_answer(text).await?;
        Ok(session.snapshot())
    }

    /// Uploads a recorded answer for the current question, records it and
    /// starts best-effort transcription in the background.
    ///
    /// The question is fixed when the call starts; navigation during the
    /// upload or the transcription does not redirect the answer.
    pub async fn save_audio_answer(
        self: &Arc<Self>,
        audio: Vec<u8>,
        duration_ms: Option<u64>,
    ) -> Result<AudioSaved, AppError> {
        let target = {
            let session = self.session.lock().await;
            session.require_active()?;
            let (target, question_type) = session.answer_target()?;
            if question_type != QuestionType::Audio {
                return Err(AppError::ValidationFailed(
                    "This question needs a written answer.".to_string(),
                ));
            }
            target
        };

        let storage_path =
            paths::audio_answer(&self.uid, &target.key, self.clock.now().timestamp_millis());
        let audio_url = self
            .blobs
            .upload(&storage_path, audio.clone())
            .await
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;

        let snapshot = {
            let mut session = self.session.lock().await;
            session
                .record_audio_answer(&target, audio_url, storage_path.clone(), duration_ms)
                .await?;
            session.snapshot()
        };

        let job = TranscriptionJob {
            question_key: target.key.clone(),
            storage_path,
            audio,
            metadata: TranscriptionMetadata {
                language_code: self.language_code.clone(),
                expected_answers: target.expected_answers,
                question_key: target.key,
            },
        };
        let transcription = Some(reconcile::spawn_auto_transcription(
            Arc::clone(self),
            Arc::clone(&self.transcriber),
            job,
        ));

        Ok(AudioSaved {
            snapshot,
            transcription,
        })
    }

    pub(crate) async fn attach_transcript(&self, key: &str, storage_path: &str, transcript: String) -> bool {
        self.session
            .lock()
            .await
            .attach_transcript(key, storage_path, transcript)
            .await
    }

    pub(crate) async fn attach_review(&self, key: &str, review: ReviewRecord) -> bool {
        self.session.lock().await.attach_review(key, review).await
    }

    /// Appends a tab-visibility change without waiting for the session lock.
    pub fn record_visibility(&self, hidden: bool) -> bool {
        let mut tabs = self.tabs.lock().unwrap_or_else(|e| e.into_inner());
        tabs.record(hidden, self.clock.now())
    }

    /// Number of times the user left the exam tab.
    pub fn tab_change_count(&self) -> usize {
        self.tabs.lock().unwrap_or_else(|e| e.into_inner()).change_count()
    }

    pub async fn submit(&self, confirm_incomplete: bool) -> Result<SubmissionReceipt, AppError> {
        let mut session = self.session.lock().await;
        session.submit(SubmitMode::Manual { confirm_incomplete }).await
    }

    /// One timer step: submits once the time limit is reached.
    pub async fn tick(&self) -> TickOutcome {
        let mut session = self.session.lock().await;
        if session.phase != SessionPhase::Active {
            return TickOutcome::Stop;
        }
        if !session.is_expired() {
            return TickOutcome::Continue;
        }

        tracing::info!(uid = %self.uid, "Time limit reached, auto-submitting");
        match session.submit(SubmitMode::Timeout).await {
            Ok(_) => TickOutcome::Stop,
            Err(e) => {
                tracing::error!(uid = %self.uid, error = %e, "Auto-submit failed, retrying next tick");
                TickOutcome::Continue
            }
        }
    }

    fn start_timer(self: &Arc<Self>) {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(handle) = weak.upgrade() else {
                    break;
                };
                if handle.tick().await == TickOutcome::Stop {
                    break;
                }
            }
        }));
    }

    /// Stops the timer and the visibility log.
    pub fn teardown(&self) {
        if let Some(timer) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.abort();
        }
        self.tabs.lock().unwrap_or_else(|e| e.into_inner()).close();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            timer.abort();
        }
    }
}

/// One live session per user within this process.
pub struct SessionRegistry {
    deps: SessionDeps,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    /// Returns the user's session, loading it from the store if needed.
    ///
    /// A submitted session stays registered for [`FINISHED_RETENTION_SECS`]
    /// so its receipt can be returned; a blocked one is dropped and reported
    /// as `AlreadyCompleted`.
    pub async fn open(
        &self,
        principal: &Principal,
    ) -> Result<(Arc<SessionHandle>, SessionSnapshot), AppError> {
        if principal.is_admin {
            return Err(AppError::Forbidden(
                "Administrators cannot take the exam.".to_string(),
            ));
        }

        self.sweep().await;

        let handle = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions
                .entry(principal.uid.clone())
                .or_insert_with(|| SessionHandle::new(principal.clone(), self.deps.clone()));
            Arc::clone(entry)
        };

        match handle.mount().await {
            Ok(snapshot) => Ok((handle, snapshot)),
            Err(e) => {
                if handle.is_finished() {
                    self.evict(&principal.uid, &handle).await;
                }
                Err(e)
            }
        }
    }

    /// Submits the user's attempt.
    ///
    /// A repeated submit after success returns the first receipt instead of
    /// appending another result.
    pub async fn submit(
        &self,
        principal: &Principal,
        confirm_incomplete: bool,
    ) -> Result<SubmissionReceipt, AppError> {
        let (handle, _) = self.open(principal).await?;
        handle.submit(confirm_incomplete).await
    }

    /// The user's session if it is loaded and still running.
    pub async fn live(&self, uid: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .await
            .get(uid)
            .filter(|h| !h.is_finished())
            .cloned()
    }

    /// Drops `handle` from the registry if it is still the registered one.
    pub async fn evict(&self, uid: &str, handle: &Arc<SessionHandle>) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(uid).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            sessions.remove(uid);
            handle.teardown();
        }
    }

    /// Drops sessions that finished more than [`FINISHED_RETENTION_SECS`]
    /// ago. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let cutoff = self.deps.clock.now() - chrono::Duration::seconds(FINISHED_RETENTION_SECS);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|uid, handle| match handle.finished_at() {
            Some(at) if at <= cutoff => {
                tracing::debug!(uid = %uid, "Evicting finished session");
                handle.teardown();
                false
            }
            _ => true,
        });
        before - sessions.len()
    }

    /// Sessions held in memory, finished ones included.
    pub async fn registered_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Stops every session's background work.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, handle) in sessions.drain() {
            handle.teardown();
        }
    }
}
