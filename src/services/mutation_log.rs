use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::database::entities::workspace_changes;
use crate::errors::{SyncError, SyncResult};
use crate::model::{EntityType, Method};

/// A persisted mutation log entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub workspace_id: String,
    pub entity_type: EntityType,
    pub method: Method,
    pub key: String,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<workspace_changes::Model> for LogEntry {
    type Error = SyncError;

    fn try_from(model: workspace_changes::Model) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            entity_type: model.entity_type.parse()?,
            method: model.method.parse()?,
            id: model.id,
            workspace_id: model.workspace_id,
            key: model.key,
            payload: model.payload,
            created_at: model.created_at,
        })
    }
}

/// An entry waiting to be appended; the log assigns its id and timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLogEntry {
    pub workspace_id: String,
    pub entity_type: EntityType,
    pub method: Method,
    pub key: String,
    pub payload: Option<Value>,
}

impl NewLogEntry {
    pub fn create(workspace_id: &str, entity_type: EntityType, key: &str, value: Value) -> Self {
        Self::with_payload(workspace_id, entity_type, Method::Create, key, Some(value))
    }

    pub fn update(workspace_id: &str, entity_type: EntityType, key: &str, value: Value) -> Self {
        Self::with_payload(workspace_id, entity_type, Method::Update, key, Some(value))
    }

    pub fn delete(workspace_id: &str, entity_type: EntityType, key: &str) -> Self {
        Self::with_payload(workspace_id, entity_type, Method::Delete, key, None)
    }

    fn with_payload(
        workspace_id: &str,
        entity_type: EntityType,
        method: Method,
        key: &str,
        payload: Option<Value>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            entity_type,
            method,
            key: key.to_string(),
            payload,
        }
    }
}

/// Append-only ledger of entity changes, partitioned by workspace.
///
/// There is no update or delete; a logical delete is a `DELETE` entry. Reads are
/// always ordered by the assigned id.
pub struct MutationLog<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> MutationLog<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Append an entry and return the id assigned by storage.
    pub async fn append(&self, entry: NewLogEntry) -> SyncResult<i64> {
        if entry.method.carries_payload() != entry.payload.is_some() {
            return Err(SyncError::Validation(format!(
                "{} entry for {} '{}' has a mismatched payload",
                entry.method, entry.entity_type, entry.key
            )));
        }

        let active_model = workspace_changes::ActiveModel {
            id: NotSet,
            workspace_id: Set(entry.workspace_id.clone()),
            entity_type: Set(entry.entity_type.into()),
            method: Set(entry.method.into()),
            key: Set(entry.key.clone()),
            payload: Set(entry.payload),
            created_at: Set(Utc::now()),
        };

        let result = workspace_changes::Entity::insert(active_model)
            .exec(self.db)
            .await?;

        debug!(
            "Appended log entry {} ({} {} '{}') for workspace {}",
            result.last_insert_id, entry.method, entry.entity_type, entry.key, entry.workspace_id
        );

        Ok(result.last_insert_id)
    }

    /// Entries with id greater than `after_id`.
    pub async fn find_since(&self, workspace_id: &str, after_id: i64) -> SyncResult<Vec<LogEntry>> {
        let rows = workspace_changes::Entity::find()
            .filter(workspace_changes::Column::WorkspaceId.eq(workspace_id))
            .filter(workspace_changes::Column::Id.gt(after_id))
            .order_by_asc(workspace_changes::Column::Id)
            .all(self.db)
            .await?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }

    pub async fn find_for_key(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Vec<LogEntry>> {
        let rows = workspace_changes::Entity::find()
            .filter(workspace_changes::Column::WorkspaceId.eq(workspace_id))
            .filter(workspace_changes::Column::EntityType.eq(entity_type.as_str()))
            .filter(workspace_changes::Column::Key.eq(key))
            .order_by_asc(workspace_changes::Column::Id)
            .all(self.db)
            .await?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }

    pub async fn find_for_type(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
    ) -> SyncResult<Vec<LogEntry>> {
        let rows = workspace_changes::Entity::find()
            .filter(workspace_changes::Column::WorkspaceId.eq(workspace_id))
            .filter(workspace_changes::Column::EntityType.eq(entity_type.as_str()))
            .order_by_asc(workspace_changes::Column::Id)
            .all(self.db)
            .await?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }

    /// Number of entries recorded for a workspace.
    pub async fn len(&self, workspace_id: &str) -> SyncResult<u64> {
        let count = workspace_changes::Entity::find()
            .filter(workspace_changes::Column::WorkspaceId.eq(workspace_id))
            .count(self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::setup_database;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let db = setup_database(":memory:").await.unwrap();
        let log = MutationLog::new(&db);

        let first = log
            .append(NewLogEntry::create("W1", EntityType::Comment, "C1", json!({"id": "C1"})))
            .await
            .unwrap();
        let second = log
            .append(NewLogEntry::delete("W1", EntityType::Comment, "C1"))
            .await
            .unwrap();
        assert!(second > first);

        let entries = log.find_for_key("W1", EntityType::Comment, "C1").await.unwrap();
        let methods: Vec<Method> = entries.iter().map(|e| e.method).collect();
        assert_eq!(methods, vec![Method::Create, Method::Delete]);
        assert_eq!(entries[1].payload, None);
    }

    #[tokio::test]
    async fn test_reads_are_partitioned_by_workspace() {
        let db = setup_database(":memory:").await.unwrap();
        let log = MutationLog::new(&db);

        log.append(NewLogEntry::create("W1", EntityType::Issue, "I1", json!({"id": "I1"})))
            .await
            .unwrap();
        let other = log
            .append(NewLogEntry::create("W2", EntityType::Issue, "I2", json!({"id": "I2"})))
            .await
            .unwrap();

        let since = log.find_since("W2", 0).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, other);
        assert!(log.find_since("W2", other).await.unwrap().is_empty());
        assert_eq!(log.len("W1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_rejects_payload_mismatch() {
        let db = setup_database(":memory:").await.unwrap();
        let log = MutationLog::new(&db);

        let mut entry = NewLogEntry::delete("W1", EntityType::Issue, "I1");
        entry.payload = Some(json!({}));
        assert!(matches!(
            log.append(entry).await,
            Err(SyncError::Validation(_))
        ));
        assert_eq!(log.len("W1").await.unwrap(), 0);
    }
}
