//! Integration tests for policy feedback storage and the durable event sink.
//!
//! **IMPORTANT**: These tests require a PostgreSQL server with the pgvector
//! extension. Run them explicitly: `cargo test -p docflow-db -- --ignored`

use docflow_core::{
    DocumentFeatures, EventSink, FeedbackRepository, NewPolicyFeedback, PipelineEvent,
};
use docflow_db::test_fixtures::TestDatabase;
use serde_json::json;
use uuid::Uuid;

fn features(tokens: &[&str]) -> DocumentFeatures {
    DocumentFeatures {
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        extension: Some("pdf".to_string()),
        mime_type: Some("application/pdf".to_string()),
        document_type: Some("invoice".to_string()),
        issuer: Some("acme".to_string()),
    }
}

#[tokio::test]
#[ignore]
async fn test_feedback_upsert_is_keyed_by_triple() {
    let test_db = TestDatabase::new().await;
    let owner = Uuid::new_v4();
    let ingestion = Uuid::new_v4();
    let policy = Uuid::new_v4();

    let first = test_db
        .db
        .feedback
        .upsert(NewPolicyFeedback {
            owner_id: owner,
            ingestion_id: ingestion,
            policy_id: policy,
            features: features(&["invoice", "acme"]),
        })
        .await
        .unwrap();

    // Re-confirming the same pair updates features in place.
    let second = test_db
        .db
        .feedback
        .upsert(NewPolicyFeedback {
            owner_id: owner,
            ingestion_id: ingestion,
            policy_id: policy,
            features: features(&["invoice", "acme", "march"]),
        })
        .await
        .unwrap();
    assert_eq!(first, second);

    let rows = test_db.db.feedback.list_for_owner(owner, 50).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].features.tokens.len(), 3);
    assert_eq!(rows[0].features.issuer.as_deref(), Some("acme"));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_feedback_list_newest_first_with_limit() {
    let test_db = TestDatabase::new().await;
    let owner = Uuid::new_v4();
    let policy = Uuid::new_v4();

    for i in 0..3 {
        test_db
            .db
            .feedback
            .upsert(NewPolicyFeedback {
                owner_id: owner,
                ingestion_id: Uuid::new_v4(),
                policy_id: policy,
                features: features(&["sample", &format!("run-{}", i)]),
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
    }

    let rows = test_db.db.feedback.list_for_owner(owner, 2).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].created_at >= rows[1].created_at);
    assert!(rows[0].features.tokens.contains(&"run-2".to_string()));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_event_sink_records_events_in_order() {
    let test_db = TestDatabase::new().await;
    let owner = Uuid::new_v4();
    let ingestion = Uuid::new_v4();

    test_db
        .db
        .events
        .log_event(PipelineEvent::new(
            Some(ingestion),
            Some(owner),
            "ingestion.status",
            "triage",
            json!({"status": "processing"}),
        ))
        .await
        .unwrap();
    test_db
        .db
        .events
        .log_event(PipelineEvent::new(
            Some(ingestion),
            Some(owner),
            "action.executed",
            "actions",
            json!({"action_type": "rename", "success": true}),
        ))
        .await
        .unwrap();

    let events = test_db
        .db
        .events
        .recent_for_ingestion(ingestion, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "ingestion.status");
    assert_eq!(events[1].kind, "action.executed");
    assert_eq!(events[1].details["action_type"], "rename");

    test_db.cleanup().await;
}
