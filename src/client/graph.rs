//! Per-workspace object graph
//!
//! An [`ObjectGraph`] owns the pool for one workspace, applies pull responses to it and hands
//! out the mutation coordinator bound to it. Graphs are cached by an explicit
//! [`ObjectGraphFactory`] that the session owns and tears down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::coordinator::{MutationTransport, OptimisticMutationCoordinator, RetryPolicy};
use crate::client::entity::Entity;
use crate::client::pool::{self, ObjectPool, SharedPool};
use crate::client::schema::ModelKind;
use crate::errors::{ClientError, ClientResult};
use crate::sync::{Change, PullCursor, PullResponse, SyncStatus};

/// Pull RPC as seen by the client.
#[async_trait]
pub trait Puller: Send + Sync {
    async fn pull(&self, workspace_id: &str, cursor: Option<&str>) -> ClientResult<PullResponse>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Token to send with the next pull
    pub cursor: Option<String>,
    pub last_processed_mutation_id: i64,
    pub status: Option<SyncStatus>,
}

impl SyncState {
    pub fn is_complete(&self) -> bool {
        self.status == Some(SyncStatus::PartialSyncComplete)
    }
}

pub struct ObjectGraph {
    workspace_id: String,
    pool: SharedPool,
    coordinator: OptimisticMutationCoordinator,
    state: Mutex<SyncState>,
}

impl ObjectGraph {
    pub fn new(
        workspace_id: impl Into<String>,
        transport: Arc<dyn MutationTransport>,
        retry: RetryPolicy,
    ) -> ClientResult<Self> {
        let workspace_id = workspace_id.into();
        let pool = ObjectPool::shared();
        pool::lock(&pool).add(Entity::workspace(workspace_id.clone()))?;

        let coordinator =
            OptimisticMutationCoordinator::new(&pool, transport, workspace_id.clone(), retry);

        Ok(Self {
            workspace_id,
            pool,
            coordinator,
            state: Mutex::new(SyncState::default()),
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn coordinator(&self) -> &OptimisticMutationCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SyncState {
        self.lock_state().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock_state().is_complete()
    }

    /// Apply one pull response to the pool and advance the stored cursor. Returns the number of
    /// entity changes applied.
    pub fn apply_pull(&self, response: PullResponse) -> ClientResult<usize> {
        let status = response.change.status();
        let changes = response.change;

        let applied = {
            let mut pool = pool::lock(&self.pool);
            let workspace_id = self.workspace_id.as_str();
            apply_changes(&mut pool, ModelKind::Issue, changes.issue, |issue| {
                Entity::issue(issue, workspace_id)
            })? + apply_changes(
                &mut pool,
                ModelKind::Description,
                changes.description,
                Entity::description,
            )? + apply_changes(&mut pool, ModelKind::Comment, changes.comment, Entity::comment)?
        };

        let mut state = self.lock_state();
        state.cursor = Some(response.cursor);
        state.last_processed_mutation_id = state
            .last_processed_mutation_id
            .max(response.last_processed_mutation_id);
        if status.is_some() {
            state.status = status;
        }

        debug!(
            "Applied {} changes to workspace '{}' (last mutation {})",
            applied, self.workspace_id, state.last_processed_mutation_id
        );
        Ok(applied)
    }

    /// Issue one pull with the stored cursor and apply the response.
    pub async fn sync_once(&self, puller: &dyn Puller) -> ClientResult<usize> {
        self.pull_and_apply(puller).await.map(|(applied, _)| applied)
    }

    /// Pull until bootstrap has completed and a log-tail pull comes back empty. Returns the
    /// number of pulls issued.
    pub async fn sync_until_complete(&self, puller: &dyn Puller) -> ClientResult<usize> {
        let mut pulls = 0;
        loop {
            let (applied, from_tail) = self.pull_and_apply(puller).await?;
            pulls += 1;
            if from_tail && applied == 0 && self.is_complete() {
                info!("Workspace '{}' in sync after {} pulls", self.workspace_id, pulls);
                return Ok(pulls);
            }
        }
    }

    /// Close the pool. Later rollbacks against it are skipped.
    pub fn teardown(&self) {
        pool::lock(&self.pool).close();
        *self.lock_state() = SyncState::default();
        debug!("Tore down object graph for '{}'", self.workspace_id);
    }

    async fn pull_and_apply(&self, puller: &dyn Puller) -> ClientResult<(usize, bool)> {
        let cursor = self.lock_state().cursor.clone();
        let from_tail = matches!(
            cursor.as_deref().map(PullCursor::try_decode),
            Some(Ok(PullCursor::LogTail { .. }))
        );

        let response = puller.pull(&self.workspace_id, cursor.as_deref()).await?;
        let applied = self.apply_pull(response)?;
        Ok((applied, from_tail))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn apply_changes<T>(
    pool: &mut ObjectPool,
    kind: ModelKind,
    changes: Vec<Change<T>>,
    to_entity: impl Fn(&T) -> ClientResult<Entity>,
) -> ClientResult<usize> {
    let applied = changes.len();
    let mut upserts = Vec::new();

    for change in changes {
        match change {
            Change::Created { value, .. } | Change::Updated { value, .. } => {
                upserts.push(to_entity(&value)?);
            }
            Change::Deleted { key } => {
                pool.upsert_many(std::mem::take(&mut upserts))?;
                match pool.remove(kind, &key) {
                    Ok(_) | Err(ClientError::NotInPool { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
            Change::Clear => {
                pool.upsert_many(std::mem::take(&mut upserts))?;
                pool.clear_kind(kind);
            }
        }
    }

    pool.upsert_many(upserts)?;
    Ok(applied)
}

/// Session-owned cache of object graphs keyed by workspace id.
pub struct ObjectGraphFactory {
    transport: Arc<dyn MutationTransport>,
    retry: RetryPolicy,
    graphs: HashMap<String, Arc<ObjectGraph>>,
}

impl ObjectGraphFactory {
    pub fn new(transport: Arc<dyn MutationTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            graphs: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, workspace_id: &str) -> ClientResult<Arc<ObjectGraph>> {
        if let Some(graph) = self.graphs.get(workspace_id) {
            return Ok(graph.clone());
        }

        let graph = Arc::new(ObjectGraph::new(
            workspace_id,
            self.transport.clone(),
            self.retry,
        )?);
        self.graphs.insert(workspace_id.to_string(), graph.clone());
        Ok(graph)
    }

    pub fn get(&self, workspace_id: &str) -> Option<Arc<ObjectGraph>> {
        self.graphs.get(workspace_id).cloned()
    }

    /// Drop and tear down one graph. Returns whether it existed.
    pub fn teardown(&mut self, workspace_id: &str) -> bool {
        match self.graphs.remove(workspace_id) {
            Some(graph) => {
                graph.teardown();
                true
            }
            None => false,
        }
    }

    pub fn teardown_all(&mut self) {
        for (_, graph) in self.graphs.drain() {
            graph.teardown();
        }
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
