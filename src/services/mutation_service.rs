use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::SyncResult;
use crate::model::{Comment, Description, EntityType, Issue};
use crate::services::entity_resolver::{merge_patch, EntityResolver};
use crate::services::mutation_log::{MutationLog, NewLogEntry};
use crate::services::notifier::ChangeNotifier;
use crate::sync::protocol::{
    CreateNewIssueRequest, CreateRequest, DeleteRequest, MutationReceipt, NewDescription,
    NewIssue, UpdateRequest,
};
use crate::sync::validation::Validate;

/// Accepts mutation requests, checks their preconditions against the resolved entity state
/// and appends to the mutation log.
///
/// A failed precondition appends nothing. Every accepted mutation pokes the workspace.
#[derive(Clone)]
pub struct MutationService {
    db: DatabaseConnection,
    notifier: Arc<dyn ChangeNotifier>,
}

impl MutationService {
    pub fn new(db: DatabaseConnection, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { db, notifier }
    }

    pub async fn create(&self, request: CreateRequest) -> SyncResult<MutationReceipt> {
        request.validate()?;

        let CreateRequest::Comment {
            workspace_id,
            params,
        } = request;

        let resolver = EntityResolver::new(&self.db);
        resolver
            .ensure_absent(&workspace_id, EntityType::Comment, &params.id)
            .await?;

        let now = Utc::now();
        let comment = Comment {
            id: params.id,
            body: params.body,
            issue_id: params.issue_id,
            creator: params.creator,
            created_at: now,
            updated_at: now,
        };

        let id = MutationLog::new(&self.db)
            .append(NewLogEntry::create(
                &workspace_id,
                EntityType::Comment,
                &comment.id,
                serde_json::to_value(&comment)?,
            ))
            .await?;

        self.poke(&workspace_id);
        Ok(MutationReceipt {
            server_mutation_id: id,
        })
    }

    pub async fn update(&self, request: UpdateRequest) -> SyncResult<MutationReceipt> {
        request.validate()?;

        let workspace_id = request.workspace_id();
        let entity_type = request.entity_type();
        let key = request.key();

        let resolver = EntityResolver::new(&self.db);
        let mut value = resolver
            .require_present(workspace_id, entity_type, key)
            .await?;

        merge_patch(&mut value, &request.delta_value()?);
        value["updatedAt"] = serde_json::to_value(Utc::now())?;
        let value = normalize(entity_type, value)?;

        let id = MutationLog::new(&self.db)
            .append(NewLogEntry::update(workspace_id, entity_type, key, value))
            .await?;

        self.poke(workspace_id);
        Ok(MutationReceipt {
            server_mutation_id: id,
        })
    }

    pub async fn delete(&self, request: DeleteRequest) -> SyncResult<MutationReceipt> {
        request.validate()?;

        let workspace_id = request.workspace_id();
        let entity_type = request.entity_type();
        let key = request.key();

        let resolver = EntityResolver::new(&self.db);
        resolver
            .require_owned(workspace_id, entity_type, key)
            .await?;

        let id = MutationLog::new(&self.db)
            .append(NewLogEntry::delete(workspace_id, entity_type, key))
            .await?;

        self.poke(workspace_id);
        Ok(MutationReceipt {
            server_mutation_id: id,
        })
    }

    /// Append ISSUE CREATE and DESCRIPTION CREATE in one transaction. The receipt carries the
    /// id of the description entry.
    pub async fn create_new_issue(
        &self,
        request: CreateNewIssueRequest,
    ) -> SyncResult<MutationReceipt> {
        request.validate()?;

        let CreateNewIssueRequest {
            workspace_id,
            issue,
            description,
        } = request;

        let txn = self.db.begin().await?;
        let id = append_new_issue(&txn, &workspace_id, issue, description).await?;
        txn.commit().await?;

        info!("Created issue in workspace {} (entry {})", workspace_id, id);

        self.poke(&workspace_id);
        Ok(MutationReceipt {
            server_mutation_id: id,
        })
    }

    fn poke(&self, workspace_id: &str) {
        let notifier = Arc::clone(&self.notifier);
        let workspace_id = workspace_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&workspace_id).await {
                warn!("Failed to poke workspace {}: {}", workspace_id, e);
            }
        });
    }
}

async fn append_new_issue<C: ConnectionTrait>(
    txn: &C,
    workspace_id: &str,
    issue: NewIssue,
    description: NewDescription,
) -> SyncResult<i64> {
    let resolver = EntityResolver::new(txn);
    resolver
        .ensure_absent(workspace_id, EntityType::Issue, &issue.id)
        .await?;
    resolver
        .ensure_absent(workspace_id, EntityType::Description, &issue.id)
        .await?;

    let now = Utc::now();
    let issue = Issue {
        id: issue.id,
        title: issue.title,
        status: issue.status,
        priority: issue.priority,
        created_at: now,
        updated_at: now,
        creator: workspace_id.to_string(),
    };
    let description = Description {
        issue_id: issue.id.clone(),
        body: description.body,
        created_at: now,
        updated_at: now,
    };

    let log = MutationLog::new(txn);
    log.append(NewLogEntry::create(
        workspace_id,
        EntityType::Issue,
        &issue.id,
        serde_json::to_value(&issue)?,
    ))
    .await?;

    log.append(NewLogEntry::create(
        workspace_id,
        EntityType::Description,
        &issue.id,
        serde_json::to_value(&description)?,
    ))
    .await
}

/// Round-trip a merged value through its record type so stored payloads are always complete.
fn normalize(entity_type: EntityType, value: Value) -> SyncResult<Value> {
    let value = match entity_type {
        EntityType::Issue => serde_json::to_value(serde_json::from_value::<Issue>(value)?)?,
        EntityType::Comment => serde_json::to_value(serde_json::from_value::<Comment>(value)?)?,
        EntityType::Description => {
            serde_json::to_value(serde_json::from_value::<Description>(value)?)?
        }
    };
    Ok(value)
}
