//! API integration tests
//!
//! Exercises the HTTP surface end to end over an in-memory database.

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use axum_test::TestServer;
use luminar::database::connection::setup_database;
use luminar::server::app::{create_app, AppState};
use luminar::services::BroadcastNotifier;
use serde_json::{json, Value};

async fn setup_test_server() -> Result<(TestServer, BroadcastNotifier)> {
    let db = setup_database(":memory:").await?;
    let notifier = BroadcastNotifier::new(16);
    let state = AppState::new(db, Arc::new(notifier.clone()), 100);

    let app = create_app(state, None)?;
    let server = TestServer::new(app)?;

    Ok((server, notifier))
}

fn new_issue(workspace_id: &str, id: &str) -> Value {
    json!({
        "workspaceId": workspace_id,
        "issue": {"id": id, "title": "Bug", "priority": "LOW", "status": "TODO"},
        "description": {"body": "repro"},
    })
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let (server, _) = setup_test_server().await?;

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["service"], "luminar-sync");
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_create_new_issue_then_pull() -> Result<()> {
    let (server, notifier) = setup_test_server().await?;
    let mut pokes = notifier.subscribe();

    let response = server
        .post("/api/v1/mutate/createNewIssue")
        .json(&new_issue("W1", "I1"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let receipt: Value = response.json();
    assert_eq!(receipt["serverMutationId"], 2);

    assert_eq!(pokes.recv().await?, "W1");

    let response = server
        .get("/api/v1/pull")
        .add_query_param("workspaceId", "W1")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["lastProcessedMutationId"], 0);
    assert_eq!(body["change"]["issue"][0], json!({"action": "CLEAR"}));
    assert_eq!(body["change"]["issue"][1]["action"], "CREATED");
    assert_eq!(body["change"]["issue"][1]["key"], "I1");
    assert_eq!(body["change"]["issue"][1]["value"]["creator"], "W1");
    assert_eq!(
        body["change"]["cursorMeta"][1]["value"]["status"],
        "PARTIAL_SYNC_INCOMPLETE"
    );
    let cursor = body["cursor"].as_str().unwrap().to_string();

    let response = server
        .get("/api/v1/pull")
        .add_query_param("workspaceId", "W1")
        .add_query_param("cursor", &cursor)
        .await;
    let body: Value = response.json();
    assert_eq!(body["change"]["description"][0]["key"], "I1");
    assert_eq!(body["change"]["description"][0]["value"]["body"], "repro");

    Ok(())
}

#[tokio::test]
async fn test_update_missing_issue_is_bad_request() -> Result<()> {
    let (server, _) = setup_test_server().await?;

    let response = server
        .post("/api/v1/mutate/update")
        .json(&json!({
            "collection": "issue",
            "workspaceId": "W1",
            "params": {"id": "I1", "delta": {"status": "DONE"}},
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(body["message"].as_str().unwrap().contains("I1"));

    Ok(())
}

#[tokio::test]
async fn test_update_merges_delta() -> Result<()> {
    let (server, _) = setup_test_server().await?;
    server
        .post("/api/v1/mutate/createNewIssue")
        .json(&new_issue("W1", "I1"))
        .await;

    let response = server
        .post("/api/v1/mutate/update")
        .json(&json!({
            "collection": "issue",
            "workspaceId": "W1",
            "params": {"id": "I1", "delta": {"status": "DONE"}},
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = server
        .get("/api/v1/pull")
        .add_query_param("workspaceId", "W1")
        .await
        .json();
    let issue = &body["change"]["issue"][1]["value"];
    assert_eq!(issue["status"], "DONE");
    assert_eq!(issue["title"], "Bug");
    assert_eq!(issue["priority"], "LOW");

    Ok(())
}

#[tokio::test]
async fn test_duplicate_comment_is_bad_request() -> Result<()> {
    let (server, _) = setup_test_server().await?;
    let comment = json!({
        "collection": "comment",
        "workspaceId": "W1",
        "params": {"id": "C1", "body": "hi", "creator": "W1", "issueId": "I1"},
    });

    let first = server.post("/api/v1/mutate/create").json(&comment).await;
    assert_eq!(first.status_code(), StatusCode::OK);

    let second = server.post("/api/v1/mutate/create").json(&comment).await;
    assert_eq!(second.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_unaccepted_collection_is_not_implemented() -> Result<()> {
    let (server, _) = setup_test_server().await?;

    let response = server
        .post("/api/v1/mutate/delete")
        .json(&json!({"collection": "description", "workspaceId": "W1", "key": "I1"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_IMPLEMENTED");

    Ok(())
}

#[tokio::test]
async fn test_malformed_bodies_are_bad_request() -> Result<()> {
    let (server, _) = setup_test_server().await?;

    let unknown_field = server
        .post("/api/v1/mutate/update")
        .json(&json!({
            "collection": "issue",
            "workspaceId": "W1",
            "params": {"id": "I1", "delta": {"title": "nope"}},
        }))
        .await;
    assert_eq!(unknown_field.status_code(), StatusCode::BAD_REQUEST);

    let bad_enum = server
        .post("/api/v1/mutate/createNewIssue")
        .json(&json!({
            "workspaceId": "W1",
            "issue": {"id": "I1", "title": "Bug", "priority": "SOMEDAY", "status": "TODO"},
            "description": {"body": "repro"},
        }))
        .await;
    assert_eq!(bad_enum.status_code(), StatusCode::BAD_REQUEST);

    let missing_workspace = server.get("/api/v1/pull").await;
    assert_eq!(missing_workspace.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}
