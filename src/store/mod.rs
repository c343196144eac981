// src/store/mod.rs

pub mod blob;
pub mod memory;
pub mod postgres;
pub mod tree;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Root locations used by the exam core.
pub mod paths {
    pub fn exam_progress(uid: &str) -> String {
        format!("examProgress/{uid}")
    }

    pub fn exam_results(uid: &str) -> String {
        format!("examResults/{uid}")
    }

    pub fn audio_reviews(uid: &str) -> String {
        format!("audioReviews/{uid}")
    }

    pub fn user_profile(uid: &str) -> String {
        format!("users/{uid}")
    }

    pub fn account(email_key: &str) -> String {
        format!("accounts/{email_key}")
    }

    /// Blob location of one recorded audio answer.
    pub fn audio_answer(uid: &str, question_key: &str, epoch_ms: i64) -> String {
        format!("examAnswers/{uid}/{question_key}/{epoch_ms}.webm")
    }
}

/// Error raised by a storage adapter.
#[derive(Debug)]
pub enum StoreError {
    /// The path is empty or contains a forbidden character.
    InvalidPath(String),
    /// The backend refused or failed the operation.
    Backend(String),
    /// A stored value could not be (de)serialized.
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidPath(p) => write!(f, "invalid store path '{}'", p),
            StoreError::Backend(msg) => write!(f, "{}", msg),
            StoreError::Serialization(msg) => write!(f, "serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Tree-structured document store.
///
/// Values are JSON trees addressed by `/`-separated paths. `write` replaces
/// the whole subtree at `path`; writing `Value::Null` removes it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Reserves a unique child location under `path` and returns its full path.
    async fn push_create(&self, path: &str) -> Result<String, StoreError>;
}

/// Typed helpers over any [`DocumentStore`].
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    async fn read_as<T>(&self, path: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.read(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn write_as<T>(&self, path: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.write(path, value).await
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^.#$\[\]/]+$").expect("segment regex is valid"));

/// Splits and validates a store path.
pub fn split_path(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if path.is_empty() || segments.iter().any(|s| !SEGMENT_RE.is_match(s)) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Returns `true` if `segment` can be used as one path component.
pub fn is_valid_segment(segment: &str) -> bool {
    SEGMENT_RE.is_match(segment)
}

/// Generates a push key. Keys sort lexically in creation order.
pub fn push_key(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{:013}-{}", now.timestamp_millis(), &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_accepts_question_keys() {
        let segments = split_path("examProgress/u1/answers/section1_standard_q3").unwrap();
        assert_eq!(
            segments,
            vec!["examProgress", "u1", "answers", "section1_standard_q3"]
        );
    }

    #[test]
    fn split_path_rejects_forbidden_characters() {
        assert!(split_path("").is_err());
        assert!(split_path("users/a.b").is_err());
        assert!(split_path("users//x").is_err());
        assert!(split_path("users/$id").is_err());
    }

    #[test]
    fn push_keys_sort_by_time() {
        let earlier = DateTime::from_timestamp_millis(1_000).unwrap();
        let later = DateTime::from_timestamp_millis(2_000).unwrap();
        assert!(push_key(earlier) < push_key(later));
        assert!(is_valid_segment(&push_key(later)));
    }
}
