use std::sync::Arc;

use marketmind::db::Database;
use marketmind::market::MarketSnapshot;
use marketmind::store::{Store, ROLE_ASSISTANT, ROLE_USER};
use serde_json::json;
use tempfile::TempDir;

async fn setup_store() -> (TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("test.db");

    let db = Database::new(path.to_str().expect("path"), 5)
        .await
        .expect("Failed to open test database");
    db.run_migrations().await.expect("Failed to run migrations");

    (dir, Arc::new(Store::new(db.pool.clone())))
}

#[tokio::test]
async fn test_message_append_is_ordered_per_session() {
    let (_dir, store) = setup_store().await;

    let session = store
        .create_session("user-1", "pre-trade", Some("Pre-trade: test"))
        .await
        .expect("Failed to create session");

    for i in 1..=5 {
        let role = if i % 2 == 1 { ROLE_USER } else { ROLE_ASSISTANT };
        store
            .append_message(&session.id, role, &format!("message {i}"))
            .await
            .expect("Failed to append message");
    }

    let messages = store
        .session_messages(&session.id)
        .await
        .expect("Failed to read messages");

    assert_eq!(messages.len(), 5);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.seq, (i + 1) as i64);
        assert_eq!(message.body, format!("message {}", i + 1));
    }
}

#[tokio::test]
async fn test_concurrent_appends_lose_nothing() {
    let (_dir, store) = setup_store().await;

    let session = store
        .create_session("user-1", "pre-trade", None)
        .await
        .expect("Failed to create session");

    let mut handles = vec![];
    for i in 0..10 {
        let store = Arc::clone(&store);
        let session_id = session.id.clone();
        handles.push(tokio::spawn(async move {
            store
                .append_message(&session_id, ROLE_USER, &format!("concurrent {i}"))
                .await
        }));
    }

    let results = futures::future::join_all(handles).await;
    for result in results {
        assert!(result.expect("task panicked").is_ok(), "append failed");
    }

    let messages = store
        .session_messages(&session.id)
        .await
        .expect("Failed to read messages");

    // nothing lost, and the sequence is gapless and strictly increasing
    assert_eq!(messages.len(), 10);
    let seqs: Vec<i64> = messages.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<i64>>());

    let mut bodies: Vec<String> = messages.iter().map(|m| m.body.clone()).collect();
    bodies.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("concurrent {i}")).collect();
    expected.sort();
    assert_eq!(bodies, expected);
}

#[tokio::test]
async fn test_messages_are_isolated_per_session() {
    let (_dir, store) = setup_store().await;

    let a = store
        .create_session("user-1", "pre-trade", None)
        .await
        .expect("session a");
    let b = store
        .create_session("user-1", "management", None)
        .await
        .expect("session b");

    store
        .append_message(&a.id, ROLE_USER, "for a")
        .await
        .expect("append a");
    store
        .append_message(&b.id, ROLE_USER, "for b")
        .await
        .expect("append b");

    let messages_a = store.session_messages(&a.id).await.expect("read a");
    assert_eq!(messages_a.len(), 1);
    assert_eq!(messages_a[0].body, "for a");
    // each session has its own sequence
    assert_eq!(messages_a[0].seq, 1);

    let messages_b = store.session_messages(&b.id).await.expect("read b");
    assert_eq!(messages_b[0].seq, 1);
}

#[tokio::test]
async fn test_get_session_enforces_ownership() {
    let (_dir, store) = setup_store().await;

    let session = store
        .create_session("user-1", "pre-trade", None)
        .await
        .expect("session");

    assert!(store
        .get_session(&session.id, "user-1")
        .await
        .expect("get")
        .is_some());
    assert!(store
        .get_session(&session.id, "someone-else")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn test_questionnaire_upsert_is_last_writer_wins() {
    let (_dir, store) = setup_store().await;

    let first = json!([{"question": "q1", "answer": "first"}]);
    let second = json!([{"question": "q1", "answer": "second"}, {"question": "q2", "answer": "extra"}]);

    store
        .upsert_questionnaire("user-1", &first)
        .await
        .expect("first upsert");
    store
        .upsert_questionnaire("user-1", &second)
        .await
        .expect("second upsert");

    let row_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM questionnaire_responses WHERE user_id = ?1")
            .bind("user-1")
            .fetch_one(store.pool())
            .await
            .expect("count");
    assert_eq!(row_count, 1, "expected exactly one questionnaire row");

    let stored = store
        .get_questionnaire("user-1")
        .await
        .expect("get")
        .expect("row present");
    assert_eq!(stored.answers, second);
}

#[tokio::test]
async fn test_missing_questionnaire_is_not_an_error() {
    let (_dir, store) = setup_store().await;

    let result = store
        .get_questionnaire("nobody")
        .await
        .expect("read should succeed");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_snapshot_audit_trail_keeps_history_and_serves_latest() {
    let (_dir, store) = setup_store().await;

    let older = MarketSnapshot {
        dataset: "market_overview".to_string(),
        payload: json!({"v": 1}),
        source: "bybit".to_string(),
        fetched_at: chrono::Utc::now() - chrono::Duration::seconds(60),
    };
    let newer = MarketSnapshot {
        dataset: "market_overview".to_string(),
        payload: json!({"v": 2}),
        source: "bybit".to_string(),
        fetched_at: chrono::Utc::now(),
    };

    store.record_snapshot(&older).await.expect("record older");
    store.record_snapshot(&newer).await.expect("record newer");

    assert_eq!(
        store
            .snapshot_count("market_overview")
            .await
            .expect("count"),
        2
    );

    let latest = store
        .latest_snapshot("market_overview")
        .await
        .expect("latest")
        .expect("row present");
    assert_eq!(latest.payload, json!({"v": 2}));

    assert!(store
        .latest_snapshot("fully_diluted")
        .await
        .expect("latest")
        .is_none());
}
