use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::database::entities::{comments, descriptions, issues};
use crate::errors::SyncResult;
use crate::model::{Comment, Description, EntityType, Issue, Method};
use crate::services::entity_resolver::apply_entry;
use crate::services::mutation_log::{LogEntry, MutationLog};
use crate::sync::cursor::PullCursor;
use crate::sync::protocol::{Change, ChangeSet, CursorMeta, PullResponse, SyncStatus};

/// Serves the phased pull protocol.
///
/// A session starts with every issue of the workspace, pages through descriptions and then
/// comments, and finally tails the mutation log. Bootstrap responses report
/// `lastProcessedMutationId = 0`.
#[derive(Clone)]
pub struct PullService {
    db: DatabaseConnection,
    page_size: u64,
}

impl PullService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_page_size(db, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(db: DatabaseConnection, page_size: u64) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    pub async fn pull(&self, workspace_id: &str, cursor: Option<&str>) -> SyncResult<PullResponse> {
        let cursor = PullCursor::decode(cursor);
        debug!("Pull for {} in phase {}", workspace_id, cursor.phase_name());

        match cursor {
            PullCursor::BootstrapIssues => self.bootstrap_issues(workspace_id).await,
            PullCursor::DescriptionPage {
                issue_id,
                created_at,
            } => {
                self.description_page(workspace_id, &issue_id, created_at)
                    .await
            }
            PullCursor::CommentPage {
                comment_id,
                created_at,
            } => self.comment_page(workspace_id, &comment_id, created_at).await,
            PullCursor::LogTail { last_change_id } => {
                self.log_tail(workspace_id, last_change_id).await
            }
        }
    }

    /// Every issue of the workspace: snapshot rows with the issue log replayed over them.
    pub async fn bootstrap_issues(&self, workspace_id: &str) -> SyncResult<PullResponse> {
        let rows = issues::Entity::find()
            .filter(issues::Column::WorkspaceId.eq(workspace_id))
            .order_by_desc(issues::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut resolved: IndexMap<String, Option<Value>> = IndexMap::new();
        for row in rows {
            let issue = row.into_record()?;
            resolved.insert(issue.id.clone(), Some(serde_json::to_value(issue)?));
        }

        let entries = MutationLog::new(&self.db)
            .find_for_type(workspace_id, EntityType::Issue)
            .await?;
        for entry in &entries {
            let current = resolved.entry(entry.key.clone()).or_insert(None);
            apply_entry(current, entry.method, entry.payload.as_ref());
        }

        let mut issue_changes = vec![Change::Clear];
        for (key, value) in resolved {
            if let Some(value) = value {
                issue_changes.push(Change::Created {
                    key,
                    value: serde_json::from_value(value)?,
                });
            }
        }

        info!(
            "Bootstrapped {} issues for workspace {}",
            issue_changes.len() - 1,
            workspace_id
        );

        Ok(PullResponse {
            change: ChangeSet {
                issue: issue_changes,
                comment: vec![Change::Clear],
                description: vec![Change::Clear],
                cursor_meta: incomplete(),
            },
            cursor: PullCursor::description_seed().encode()?,
            last_processed_mutation_id: 0,
        })
    }

    /// One page of descriptions ordered by `(createdAt desc, issueId desc)`.
    ///
    /// The first page also folds in the description log: CREATE entries are appended and
    /// UPDATE entries replace a row with the same key already on the page.
    pub async fn description_page(
        &self,
        workspace_id: &str,
        issue_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> SyncResult<PullResponse> {
        let mut query =
            descriptions::Entity::find().filter(descriptions::Column::WorkspaceId.eq(workspace_id));

        if let Some(created_at) = created_at {
            query = query.filter(
                Condition::any()
                    .add(descriptions::Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(descriptions::Column::CreatedAt.eq(created_at))
                            .add(descriptions::Column::IssueId.lt(issue_id)),
                    ),
            );
        }

        let rows = query
            .order_by_desc(descriptions::Column::CreatedAt)
            .order_by_desc(descriptions::Column::IssueId)
            .limit(self.page_size)
            .all(&self.db)
            .await?;

        let mut page: Vec<Description> = rows.into_iter().map(Description::from).collect();

        if created_at.is_none() {
            let entries = MutationLog::new(&self.db)
                .find_for_type(workspace_id, EntityType::Description)
                .await?;
            splice_log_entries(&mut page, &entries)?;
        }

        let next = match page.last() {
            Some(last) => PullCursor::DescriptionPage {
                issue_id: last.issue_id.clone(),
                created_at: Some(last.created_at),
            },
            None => PullCursor::comment_seed(),
        };

        debug!("Description page of {} rows for {}", page.len(), workspace_id);

        Ok(PullResponse {
            change: ChangeSet {
                description: page
                    .into_iter()
                    .map(|description| Change::Created {
                        key: description.issue_id.clone(),
                        value: description,
                    })
                    .collect(),
                cursor_meta: incomplete(),
                ..Default::default()
            },
            cursor: next.encode()?,
            last_processed_mutation_id: 0,
        })
    }

    /// One page of comments ordered by `(createdAt desc, id desc)`. An empty page completes
    /// the bootstrap and hands the session over to the log tail.
    pub async fn comment_page(
        &self,
        workspace_id: &str,
        comment_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> SyncResult<PullResponse> {
        let mut query =
            comments::Entity::find().filter(comments::Column::WorkspaceId.eq(workspace_id));

        if let Some(created_at) = created_at {
            query = query.filter(
                Condition::any()
                    .add(comments::Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(comments::Column::CreatedAt.eq(created_at))
                            .add(comments::Column::Id.lt(comment_id)),
                    ),
            );
        }

        let rows = query
            .order_by_desc(comments::Column::CreatedAt)
            .order_by_desc(comments::Column::Id)
            .limit(self.page_size)
            .all(&self.db)
            .await?;

        let page: Vec<Comment> = rows.into_iter().map(Comment::from).collect();

        let (next, status) = match page.last() {
            Some(last) => (
                PullCursor::CommentPage {
                    comment_id: last.id.clone(),
                    created_at: Some(last.created_at),
                },
                SyncStatus::PartialSyncIncomplete,
            ),
            None => (
                PullCursor::LogTail { last_change_id: 0 },
                SyncStatus::PartialSyncComplete,
            ),
        };

        if status == SyncStatus::PartialSyncComplete {
            info!("Bootstrap complete for workspace {}", workspace_id);
        }

        Ok(PullResponse {
            change: ChangeSet {
                comment: page
                    .into_iter()
                    .map(|comment| Change::Created {
                        key: comment.id.clone(),
                        value: comment,
                    })
                    .collect(),
                cursor_meta: vec![Change::Clear, Change::meta(status)],
                ..Default::default()
            },
            cursor: next.encode()?,
            last_processed_mutation_id: 0,
        })
    }

    /// Every log entry after `last_change_id`, translated into change records.
    pub async fn log_tail(&self, workspace_id: &str, last_change_id: i64) -> SyncResult<PullResponse> {
        let entries = MutationLog::new(&self.db)
            .find_since(workspace_id, last_change_id)
            .await?;

        let mut change = ChangeSet::default();
        for entry in &entries {
            match entry.entity_type {
                EntityType::Issue => change.issue.push(to_change(entry)?),
                EntityType::Comment => change.comment.push(to_change(entry)?),
                EntityType::Description => change.description.push(to_change(entry)?),
            }
        }

        let last_id = entries.last().map_or(last_change_id, |entry| entry.id);
        if !entries.is_empty() {
            debug!(
                "Log tail for {}: {} entries up to {}",
                workspace_id,
                entries.len(),
                last_id
            );
        }

        Ok(PullResponse {
            change,
            cursor: PullCursor::LogTail {
                last_change_id: last_id,
            }
            .encode()?,
            last_processed_mutation_id: last_id,
        })
    }
}

fn incomplete() -> Vec<Change<CursorMeta>> {
    vec![Change::Clear, Change::meta(SyncStatus::PartialSyncIncomplete)]
}

fn decode_payload<T: DeserializeOwned>(entry: &LogEntry) -> SyncResult<T> {
    let payload = entry.payload.clone().unwrap_or(Value::Null);
    Ok(serde_json::from_value(payload)?)
}

fn to_change<T: DeserializeOwned>(entry: &LogEntry) -> SyncResult<Change<T>> {
    let key = entry.key.clone();
    let change = match entry.method {
        Method::Create => Change::Created {
            key,
            value: decode_payload(entry)?,
        },
        Method::Update => Change::Updated {
            key,
            value: decode_payload(entry)?,
        },
        Method::Delete => Change::Deleted { key },
    };
    Ok(change)
}

/// Key-match splice of description log entries into a first page. Entries for keys that are
/// neither created in the log nor already on the page are skipped.
fn splice_log_entries(page: &mut Vec<Description>, entries: &[LogEntry]) -> SyncResult<()> {
    for entry in entries {
        match entry.method {
            Method::Create => page.push(decode_payload(entry)?),
            Method::Update => {
                if let Some(position) = page.iter().position(|d| d.issue_id == entry.key) {
                    page[position] = decode_payload(entry)?;
                }
            }
            Method::Delete => {}
        }
    }
    Ok(())
}
