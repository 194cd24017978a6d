//! Client object graph against the real mutation and pull services
//!
//! The transport runs the services in-process and reports their failures the way the HTTP
//! surface would.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use luminar::client::pool;
use luminar::client::{
    ModelKind, MutationTransport, ObjectGraph, ObjectGraphFactory, Puller, RetryPolicy,
};
use luminar::database::entities::issues;
use luminar::database::setup_database;
use luminar::errors::{ClientError, ClientResult, SyncError};
use luminar::model::{IssuePriority, IssueStatus};
use luminar::services::{LogNotifier, MutationService, PullService};
use luminar::sync::protocol::{NewDescription, NewIssue};
use luminar::sync::{
    CreateNewIssueRequest, CreateRequest, DeleteRequest, MutationReceipt, PullResponse,
    UpdateRequest,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;

struct InProcess {
    mutations: MutationService,
    pulls: PullService,
}

fn remote(err: SyncError) -> ClientError {
    ClientError::remote(err.error_code(), err.status_code().as_u16(), err.to_string())
}

#[async_trait]
impl MutationTransport for InProcess {
    async fn create(&self, request: &CreateRequest) -> ClientResult<MutationReceipt> {
        self.mutations.create(request.clone()).await.map_err(remote)
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<MutationReceipt> {
        self.mutations.update(request.clone()).await.map_err(remote)
    }

    async fn delete(&self, request: &DeleteRequest) -> ClientResult<MutationReceipt> {
        self.mutations.delete(request.clone()).await.map_err(remote)
    }

    async fn create_new_issue(
        &self,
        request: &CreateNewIssueRequest,
    ) -> ClientResult<MutationReceipt> {
        self.mutations
            .create_new_issue(request.clone())
            .await
            .map_err(remote)
    }
}

#[async_trait]
impl Puller for InProcess {
    async fn pull(&self, workspace_id: &str, cursor: Option<&str>) -> ClientResult<PullResponse> {
        self.pulls.pull(workspace_id, cursor).await.map_err(remote)
    }
}

async fn setup() -> Result<(Arc<InProcess>, DatabaseConnection)> {
    let db = setup_database(":memory:").await?;
    let backend = Arc::new(InProcess {
        mutations: MutationService::new(db.clone(), Arc::new(LogNotifier)),
        pulls: PullService::with_page_size(db.clone(), 2),
    });
    Ok((backend, db))
}

fn graph(backend: &Arc<InProcess>, workspace_id: &str) -> Result<ObjectGraph> {
    Ok(ObjectGraph::new(
        workspace_id,
        backend.clone(),
        RetryPolicy::immediate(2),
    )?)
}

fn new_issue(id: &str, title: &str) -> (NewIssue, NewDescription) {
    (
        NewIssue {
            id: id.to_string(),
            title: title.to_string(),
            priority: IssuePriority::Medium,
            status: IssueStatus::Todo,
        },
        NewDescription {
            body: format!("{} repro", title),
        },
    )
}

#[tokio::test]
async fn test_second_session_sees_created_issue() -> Result<()> {
    let (backend, _db) = setup().await?;
    let author = graph(&backend, "W1")?;
    let reader = graph(&backend, "W1")?;

    let (issue, description) = new_issue("I1", "Crash");
    author.coordinator().create_issue(issue, description).await?;

    let comment = author.coordinator().new_comment("I1", "seen it too")?;
    author.coordinator().create(comment).await?;

    reader.sync_until_complete(backend.as_ref()).await?;
    assert!(reader.is_complete());

    let pool = pool::lock(reader.pool());
    let issue = pool.get(ModelKind::Issue, "I1").unwrap();
    assert_eq!(issue.get_str("title"), Some("Crash"));
    assert_eq!(issue.get_str("creator"), Some("W1"));

    let description = pool.relation(ModelKind::Issue, "I1", "description")?;
    assert_eq!(description.get_str("body"), Some("Crash repro"));
    assert_eq!(pool.children(ModelKind::Issue, "I1", "comments")?.len(), 1);
    assert_eq!(pool.children(ModelKind::Workspace, "W1", "issues")?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_updates_reach_other_sessions_through_log_tail() -> Result<()> {
    let (backend, _db) = setup().await?;
    let author = graph(&backend, "W1")?;
    let reader = graph(&backend, "W1")?;

    let (issue, description) = new_issue("I1", "Crash");
    author.coordinator().create_issue(issue, description).await?;
    reader.sync_until_complete(backend.as_ref()).await?;

    pool::lock(author.pool()).stage(ModelKind::Issue, "I1", "status", json!("IN_PROGRESS"))?;
    author.coordinator().update(ModelKind::Issue, "I1").await?;

    let applied = reader.sync_once(backend.as_ref()).await?;
    assert_eq!(applied, 1);

    let pool = pool::lock(reader.pool());
    let issue = pool.get(ModelKind::Issue, "I1").unwrap();
    assert_eq!(issue.get_str("status"), Some("IN_PROGRESS"));
    assert_eq!(issue.get_str("title"), Some("Crash"));

    Ok(())
}

#[tokio::test]
async fn test_forbidden_delete_is_rolled_back() -> Result<()> {
    let (backend, db) = setup().await?;
    let now = Utc::now();
    issues::ActiveModel {
        id: Set("I1".to_string()),
        workspace_id: Set("W1".to_string()),
        title: Set("Imported".to_string()),
        status: Set("BACKLOG".to_string()),
        priority: Set("HIGH".to_string()),
        creator: Set("W2".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await?;

    let session = graph(&backend, "W1")?;
    session.sync_until_complete(backend.as_ref()).await?;
    let before = pool::lock(session.pool())
        .get(ModelKind::Issue, "I1")
        .cloned()
        .unwrap();

    let err = session
        .coordinator()
        .delete(ModelKind::Issue, "I1")
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        ClientError::Remote { code, status: 400, .. } if code == "BAD_REQUEST"
    ));

    let pool = pool::lock(session.pool());
    let restored = pool.get(ModelKind::Issue, "I1").unwrap();
    assert_eq!(restored.to_value(), before.to_value());
    assert_eq!(pool.children(ModelKind::Workspace, "W1", "issues")?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_deleting_owned_issue_cascades_locally() -> Result<()> {
    let (backend, _db) = setup().await?;
    let session = graph(&backend, "W1")?;

    let (issue, description) = new_issue("I1", "Crash");
    session.coordinator().create_issue(issue, description).await?;
    for body in ["first", "second"] {
        let comment = session.coordinator().new_comment("I1", body)?;
        session.coordinator().create(comment).await?;
    }
    assert_eq!(pool::lock(session.pool()).len(ModelKind::Comment), 2);

    session.coordinator().delete(ModelKind::Issue, "I1").await?;

    let pool = pool::lock(session.pool());
    assert!(!pool.contains(ModelKind::Issue, "I1"));
    assert_eq!(pool.len(ModelKind::Comment), 0);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_issue_is_rolled_back() -> Result<()> {
    let (backend, _db) = setup().await?;
    let first = graph(&backend, "W1")?;
    let second = graph(&backend, "W1")?;

    let (issue, description) = new_issue("I1", "Crash");
    first.coordinator().create_issue(issue, description).await?;

    let (issue, description) = new_issue("I1", "Same id");
    let err = second
        .coordinator()
        .create_issue(issue, description)
        .await
        .unwrap_err();
    assert!(!err.is_retryable());

    let pool = pool::lock(second.pool());
    assert!(!pool.contains(ModelKind::Issue, "I1"));
    assert!(!pool.contains(ModelKind::Description, "I1"));

    Ok(())
}

#[tokio::test]
async fn test_factory_graphs_are_independent() -> Result<()> {
    let (backend, _db) = setup().await?;
    let mut factory = ObjectGraphFactory::new(backend.clone(), RetryPolicy::immediate(1));

    let w1 = factory.get_or_create("W1")?;
    let w2 = factory.get_or_create("W2")?;

    let (issue, description) = new_issue("I1", "Crash");
    w1.coordinator().create_issue(issue, description).await?;

    w2.sync_until_complete(backend.as_ref()).await?;
    assert_eq!(pool::lock(w2.pool()).len(ModelKind::Issue), 0);

    factory.teardown_all();
    assert!(pool::lock(w1.pool()).is_closed());

    Ok(())
}
