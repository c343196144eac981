// tests/pg_store_tests.rs
//
// Runs against a real database only when TEST_DATABASE_URL is set.

use std::sync::Arc;

use examertric::store::{DocumentStore, PgStore};
use serde_json::json;

async fn connect() -> Option<PgStore> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    Some(PgStore::connect(&url, 0).await.expect("Failed to connect to test database"))
}

#[tokio::test]
async fn concurrent_first_writes_to_one_document_all_land() {
    let Some(store) = connect().await else {
        return;
    };
    let store = Arc::new(store);
    let uid = uuid::Uuid::new_v4().simple().to_string();

    let writes = (0..16).map(|i| {
        let store = Arc::clone(&store);
        let path = format!("audioReviews/{}/section2_standard_a{}", uid, i);
        tokio::spawn(async move { store.write(&path, json!({ "transcript": i })).await })
    });
    for write in writes.collect::<Vec<_>>() {
        write.await.unwrap().unwrap();
    }

    let stored = store
        .read(&format!("audioReviews/{}", uid))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.as_object().unwrap().len(), 16);

    store.write(&format!("audioReviews/{}", uid), serde_json::Value::Null).await.unwrap();
}
