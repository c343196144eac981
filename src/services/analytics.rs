// src/services/analytics.rs

use serde_json::Value;

use crate::models::exam_result::{ExamResult, ResultStats, ScoreBucket, StoredResult};
use crate::store::{DocumentStore, StoreError, paths};

const BUCKETS: [(&str, i64); 5] = [
    ("0-20", 20),
    ("21-40", 40),
    ("41-60", 60),
    ("61-80", 80),
    ("81-100", i64::MAX),
];

/// Reads every submitted result of `uid`, newest first.
///
/// Entries that no longer parse are logged and left out.
pub async fn load_results(store: &dyn DocumentStore, uid: &str) -> Result<Vec<StoredResult>, StoreError> {
    let Some(Value::Object(map)) = store.read(&paths::exam_results(uid)).await? else {
        return Ok(Vec::new());
    };

    let mut results: Vec<StoredResult> = map
        .into_iter()
        .filter_map(|(id, raw)| match serde_json::from_value::<ExamResult>(raw) {
            Ok(result) => Some(StoredResult { id, result }),
            Err(e) => {
                tracing::warn!(uid = %uid, result_id = %id, error = %e, "Skipping unreadable result");
                None
            }
        })
        .collect();

    results.sort_by(|a, b| b.result.timestamp.cmp(&a.result.timestamp));
    Ok(results)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Aggregates a user's results for the analytics page.
pub fn summarize(results: &[StoredResult]) -> ResultStats {
    let mut distribution: Vec<ScoreBucket> = BUCKETS
        .iter()
        .map(|(range, _)| ScoreBucket { range: *range, count: 0 })
        .collect();

    let total_exams = results.len();
    if total_exams == 0 {
        return ResultStats {
            total_exams,
            average_score: 0.0,
            average_time_spent: 0,
            average_completion: 0.0,
            text_answers: 0,
            audio_answers: 0,
            score_distribution: distribution,
        };
    }

    let mut score_sum = 0.0;
    let mut time_sum = 0.0;
    let mut completion_sum = 0.0;
    let mut text_answers = 0;
    let mut audio_answers = 0;

    for StoredResult { result, .. } in results {
        score_sum += result.score as f64;
        time_sum += result.time_spent as f64;
        if result.total_questions > 0 {
            completion_sum += result.answered_count as f64 / result.total_questions as f64 * 100.0;
        }
        for answer in result.answers.values() {
            if answer.text.is_some() {
                text_answers += 1;
            }
            if answer.audio_url.is_some() {
                audio_answers += 1;
            }
        }

        if let Some(index) = BUCKETS.iter().position(|(_, upper)| result.score <= *upper) {
            distribution[index].count += 1;
        }
    }

    let n = total_exams as f64;
    ResultStats {
        total_exams,
        average_score: round1(score_sum / n),
        average_time_spent: (time_sum / n).round() as i64,
        average_completion: round1(completion_sum / n),
        text_answers,
        audio_answers,
        score_distribution: distribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStoreExt, MemoryStore};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn result(score: i64, answered: usize, total: usize, minutes_ago: i64) -> ExamResult {
        ExamResult {
            user_id: "u1".into(),
            email: None,
            answers: BTreeMap::new(),
            analysis: BTreeMap::new(),
            score,
            correct_answers: 0,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            time_spent: 600,
            total_questions: total,
            answered_count: answered,
            tab_change_events: vec![],
            tab_change_count: 0,
        }
    }

    #[test]
    fn buckets_follow_inclusive_upper_bounds() {
        let results: Vec<StoredResult> = [0, 20, 21, 60, 61, 100]
            .into_iter()
            .enumerate()
            .map(|(i, score)| StoredResult {
                id: format!("r{i}"),
                result: result(score, 11, 22, i as i64),
            })
            .collect();

        let stats = summarize(&results);
        let counts: Vec<usize> = stats.score_distribution.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 1, 1]);
        assert_eq!(stats.average_completion, 50.0);
        assert_eq!(stats.average_time_spent, 600);
        assert_eq!(stats.average_score, 43.7);
    }

    #[test]
    fn empty_results_have_zeroed_buckets() {
        let stats = summarize(&[]);
        assert_eq!(stats.total_exams, 0);
        assert_eq!(stats.score_distribution.len(), 5);
    }

    #[tokio::test]
    async fn load_results_sorts_newest_first() {
        let store = MemoryStore::new();
        store.write_as("examResults/u1/old", &result(10, 1, 1, 30)).await.unwrap();
        store.write_as("examResults/u1/new", &result(90, 1, 1, 1)).await.unwrap();

        let loaded = load_results(&store, "u1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "new");
        assert!(load_results(&store, "nobody").await.unwrap().is_empty());
    }
}
