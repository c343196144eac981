// src/services/review_queue.rs

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::models::exam_progress::{AnswerRecord, ExamProgress};
use crate::models::question::QuestionBank;
use crate::models::review::ReviewItem;
use crate::models::user::{UserSummary, UserProfile};
use crate::services::analytics;
use crate::store::{DocumentStore, DocumentStoreExt, StoreError, paths};

async fn read_root(store: &dyn DocumentStore, root: &str) -> Result<Map<String, Value>, StoreError> {
    match store.read(root).await? {
        Some(Value::Object(map)) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Users that have started or finished an attempt, ordered by email.
pub async fn list_users(store: &dyn DocumentStore) -> Result<Vec<UserSummary>, StoreError> {
    let progress = read_root(store, "examProgress").await?;
    let results = read_root(store, "examResults").await?;

    let uids: BTreeSet<&String> = progress.keys().chain(results.keys()).collect();
    let mut users = Vec::with_capacity(uids.len());

    for uid in uids {
        let profile: Option<UserProfile> = store
            .read_as(&paths::user_profile(uid))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(uid = %uid, error = %e, "Unreadable profile");
                None
            });
        let has_progress = progress
            .get(uid)
            .and_then(|p| serde_json::from_value::<ExamProgress>(p.clone()).ok())
            .is_some_and(|p| !p.submitted);

        users.push(UserSummary {
            uid: uid.clone(),
            email: profile.as_ref().and_then(|p| p.email.clone()),
            name: profile.and_then(|p| p.name),
            has_progress,
            result_count: results
                .get(uid)
                .and_then(Value::as_object)
                .map_or(0, Map::len),
        });
    }

    users.sort_by(|a, b| a.email.cmp(&b.email).then_with(|| a.uid.cmp(&b.uid)));
    Ok(users)
}

fn needs_review(answer: &AnswerRecord) -> bool {
    answer.is_audio()
}

fn item(
    uid: &str,
    key: &str,
    source: String,
    answer: &AnswerRecord,
    expected_answers: Vec<String>,
    reviewed: &BTreeSet<String>,
) -> ReviewItem {
    ReviewItem {
        user_id: uid.to_string(),
        question_key: key.to_string(),
        source,
        audio_url: answer.audio_url.clone(),
        storage_path: answer.storage_path.clone(),
        transcript: answer.text.clone(),
        expected_answers,
        reviewed: reviewed.contains(key),
    }
}

/// Audio answers of one user, from the live attempt and from every result.
pub async fn list_review_items(
    store: &dyn DocumentStore,
    bank: &QuestionBank,
    uid: &str,
) -> Result<Vec<ReviewItem>, StoreError> {
    let reviewed: BTreeSet<String> = read_root(store, &paths::audio_reviews(uid))
        .await?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    let expected_for = |key: &str| {
        bank.resolve_key(key)
            .map(|(_, q)| q.accepted_answers.clone())
            .unwrap_or_default()
    };

    let mut items = Vec::new();

    let progress: Option<ExamProgress> = store.read_as(&paths::exam_progress(uid)).await?;
    if let Some(progress) = progress.filter(|p| !p.submitted) {
        for (key, answer) in progress.answers.iter().filter(|(_, a)| needs_review(a)) {
            items.push(item(uid, key, "progress".to_string(), answer, expected_for(key), &reviewed));
        }
    }

    for stored in analytics::load_results(store, uid).await? {
        let analysis: &BTreeMap<_, _> = &stored.result.analysis;
        for (key, answer) in stored.result.answers.iter().filter(|(_, a)| needs_review(a)) {
            let expected = analysis
                .get(key)
                .map(|a| a.expected_answers.clone())
                .unwrap_or_else(|| expected_for(key));
            items.push(item(uid, key, stored.id.clone(), answer, expected, &reviewed));
        }
    }

    Ok(items)
}
