//! Optimistic mutations
//!
//! Every operation changes the pool first and then sends the matching RPC. Retryable failures
//! are resent with exponential backoff; a terminal failure reverses the local change so the pool
//! matches the last state the server confirmed. When the pool has been torn down in the
//! meantime the reversal is skipped.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::client::entity::{Entity, PendingChange};
use crate::client::pool::{self, ObjectPool, SharedPool};
use crate::client::schema::ModelKind;
use crate::errors::{ClientError, ClientResult};
use crate::model::{generate_id, Comment, Description, Issue};
use crate::sync::{
    CreateNewIssueRequest, CreateRequest, DeleteRequest, MutationReceipt, UpdateRequest, Validate,
};
use crate::sync::protocol::{NewComment, NewDescription, NewIssue};

/// Mutation RPCs as seen by the client.
#[async_trait]
pub trait MutationTransport: Send + Sync {
    async fn create(&self, request: &CreateRequest) -> ClientResult<MutationReceipt>;
    async fn update(&self, request: &UpdateRequest) -> ClientResult<MutationReceipt>;
    async fn delete(&self, request: &DeleteRequest) -> ClientResult<MutationReceipt>;
    async fn create_new_issue(
        &self,
        request: &CreateNewIssueRequest,
    ) -> ClientResult<MutationReceipt>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before resending after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

pub struct OptimisticMutationCoordinator {
    pool: Weak<std::sync::Mutex<ObjectPool>>,
    transport: Arc<dyn MutationTransport>,
    workspace_id: String,
    retry: RetryPolicy,
}

impl OptimisticMutationCoordinator {
    pub fn new(
        pool: &SharedPool,
        transport: Arc<dyn MutationTransport>,
        workspace_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            transport,
            workspace_id: workspace_id.into(),
            retry,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// A new comment authored by this workspace, ready for [`Self::create`].
    pub fn new_comment(&self, issue_id: &str, body: &str) -> ClientResult<Entity> {
        let now = Utc::now();
        Entity::comment(&Comment {
            id: generate_id("comment"),
            body: body.to_string(),
            issue_id: issue_id.to_string(),
            creator: self.workspace_id.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Insert a comment and send the create RPC.
    pub async fn create(&self, entity: Entity) -> ClientResult<MutationReceipt> {
        if entity.kind() != ModelKind::Comment {
            return Err(ClientError::Validation(format!(
                "create accepts comments, not {}",
                entity.kind()
            )));
        }

        let params = NewComment {
            id: entity.id().to_string(),
            body: field_string(&entity, "body")?,
            creator: field_string(&entity, "creator")?,
            issue_id: field_string(&entity, "issueId")?,
        };
        let request = CreateRequest::Comment {
            workspace_id: self.workspace_id.clone(),
            params,
        };
        request.validate()?;

        let id = entity.id().to_string();
        self.apply(|pool| pool.add(entity))?;
        debug!("Optimistically created comment '{}'", id);

        let result = self.dispatch(|| self.transport.create(&request)).await;
        if let Err(err) = &result {
            info!("Rolling back comment '{}' after failed create: {}", id, err);
            self.rollback(|pool| pool.remove(ModelKind::Comment, &id).map(|_| ()));
        }
        result
    }

    /// Insert an issue with its description and send the createNewIssue RPC.
    pub async fn create_issue(
        &self,
        issue: NewIssue,
        description: NewDescription,
    ) -> ClientResult<MutationReceipt> {
        let request = CreateNewIssueRequest {
            workspace_id: self.workspace_id.clone(),
            issue,
            description,
        };
        request.validate()?;

        let now = Utc::now();
        let id = request.issue.id.clone();
        let issue_entity = Entity::issue(
            &Issue {
                id: id.clone(),
                title: request.issue.title.clone(),
                status: request.issue.status,
                priority: request.issue.priority,
                created_at: now,
                updated_at: now,
                creator: self.workspace_id.clone(),
            },
            &self.workspace_id,
        )?;
        let description_entity = Entity::description(&Description {
            issue_id: id.clone(),
            body: request.description.body.clone(),
            created_at: now,
            updated_at: now,
        })?;

        self.apply(|pool| pool.add_many(vec![issue_entity, description_entity]))?;
        debug!("Optimistically created issue '{}'", id);

        let result = self.dispatch(|| self.transport.create_new_issue(&request)).await;
        if let Err(err) = &result {
            info!("Rolling back issue '{}' after failed create: {}", id, err);
            self.rollback(|pool| {
                let removed_issue = pool.remove(ModelKind::Issue, &id).map(|_| ());
                let removed_description = pool.remove(ModelKind::Description, &id).map(|_| ());
                removed_issue.and(removed_description)
            });
        }
        result
    }

    /// Save an entity's buffered writes and send only those fields as the update delta.
    pub async fn update(&self, kind: ModelKind, id: &str) -> ClientResult<MutationReceipt> {
        let request = self.update_request(kind, id)?;
        request.validate()?;

        let changes = self.apply(|pool| pool.apply_pending(kind, id, Utc::now()))?;
        debug!("Optimistically updated {} '{}'", kind, id);

        let result = self.dispatch(|| self.transport.update(&request)).await;
        if let Err(err) = &result {
            info!("Rolling back update of {} '{}': {}", kind, id, err);
            self.rollback(|pool| pool.restore_fields(kind, id, &changes).map(|_| ()));
        }
        result
    }

    /// Remove an entity (and its cascade) and send the delete RPC.
    pub async fn delete(&self, kind: ModelKind, id: &str) -> ClientResult<MutationReceipt> {
        let request: DeleteRequest = serde_json::from_value(json!({
            "collection": kind.name(),
            "workspaceId": self.workspace_id,
            "key": id,
        }))
        .map_err(|_| ClientError::Validation(format!("{} cannot be deleted", kind)))?;
        request.validate()?;

        let removed = self.apply(|pool| pool.remove(kind, id))?;
        debug!("Optimistically deleted {} '{}' ({} entities)", kind, id, removed.len());

        let result = self.dispatch(|| self.transport.delete(&request)).await;
        if let Err(err) = &result {
            info!("Restoring {} '{}' after failed delete: {}", kind, id, err);
            self.rollback(|pool| pool.restore(removed).map(|_| ()));
        }
        result
    }

    fn update_request(&self, kind: ModelKind, id: &str) -> ClientResult<UpdateRequest> {
        let pending = self.apply(|pool| {
            pool.get(kind, id)
                .map(|entity| entity.pending().clone())
                .ok_or_else(|| ClientError::NotInPool {
                    model: kind.name().to_string(),
                    id: id.to_string(),
                })
        })?;
        if pending.is_empty() {
            return Err(ClientError::Validation(format!(
                "{} '{}' has no pending changes",
                kind, id
            )));
        }

        build_update_request(kind, id, &self.workspace_id, &pending)
    }

    /// Run a synchronous pool change. Fails when the pool is gone.
    fn apply<R>(&self, change: impl FnOnce(&mut ObjectPool) -> ClientResult<R>) -> ClientResult<R> {
        let pool = self.pool.upgrade().ok_or(ClientError::PoolClosed)?;
        let mut guard = pool::lock(&pool);
        change(&mut *guard)
    }

    /// Reverse an optimistic change. A missing or closed pool makes this a no-op.
    fn rollback(&self, reverse: impl FnOnce(&mut ObjectPool) -> ClientResult<()>) {
        let Some(pool) = self.pool.upgrade() else {
            debug!("Pool dropped; skipping rollback");
            return;
        };
        let mut guard = pool::lock(&pool);
        if guard.is_closed() {
            debug!("Pool closed; skipping rollback");
            return;
        }
        if let Err(err) = reverse(&mut *guard) {
            debug!("Rollback left pool unchanged: {}", err);
        }
    }

    async fn dispatch<F, Fut>(&self, send: F) -> ClientResult<MutationReceipt>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ClientResult<MutationReceipt>>,
    {
        let mut attempt = 1;
        loop {
            match send().await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Mutation attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, self.retry.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Build the update RPC from pending writes. Only fields the collection accepts may be pending;
/// `updatedAt` is stamped on apply and never sent.
fn build_update_request(
    kind: ModelKind,
    id: &str,
    workspace_id: &str,
    pending: &IndexMap<&'static str, PendingChange>,
) -> ClientResult<UpdateRequest> {
    let updatable = kind.schema().updatable;
    let mut delta = Map::new();

    for (field, change) in pending {
        if *field == "updatedAt" {
            continue;
        }
        if !updatable.contains(field) {
            return Err(ClientError::Validation(format!(
                "{} field '{}' cannot be updated",
                kind, field
            )));
        }
        delta.insert(field.to_string(), change.new.clone());
    }

    serde_json::from_value(json!({
        "collection": kind.name(),
        "workspaceId": workspace_id,
        "params": { "id": id, "delta": Value::Object(delta) },
    }))
    .map_err(|err| ClientError::Validation(format!("invalid {} update: {}", kind, err)))
}

fn field_string(entity: &Entity, field: &str) -> ClientResult<String> {
    entity
        .get_str(field)
        .map(str::to_string)
        .ok_or_else(|| ClientError::Validation(format!("{} needs '{}'", entity.kind(), field)))
}
