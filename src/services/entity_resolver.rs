//! Entity reconstruction from snapshot rows plus mutation log replay

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::database::entities::{comments, descriptions, issues};
use crate::errors::{SyncError, SyncResult};
use crate::model::{Comment, Description, EntityType, Method};
use crate::services::mutation_log::{LogEntry, MutationLog};

/// Shallow merge of `patch` over `target`. Non-object targets are replaced outright.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (field, value) in patch {
                target.insert(field.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Fold a single log entry into a working value.
///
/// CREATE and UPDATE merge their payload over the current value (an absent value starts
/// empty). DELETE resets to absent; entries after a DELETE still apply.
pub fn apply_entry(current: &mut Option<Value>, method: Method, payload: Option<&Value>) {
    match (method, payload) {
        (Method::Delete, _) => *current = None,
        (_, Some(payload)) => {
            let working = current.get_or_insert_with(|| Value::Object(Default::default()));
            merge_patch(working, payload);
        }
        (_, None) => {}
    }
}

/// Current value of an entity: the base row with its ordered log entries replayed on top.
pub fn replay(base: Option<Value>, entries: &[LogEntry]) -> Option<Value> {
    let mut current = base;
    for entry in entries {
        apply_entry(&mut current, entry.method, entry.payload.as_ref());
    }
    current
}

/// Resolves entity state and enforces mutation preconditions.
pub struct EntityResolver<'a, C: ConnectionTrait> {
    db: &'a C,
    log: MutationLog<'a, C>,
}

impl<'a, C: ConnectionTrait> EntityResolver<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self {
            db,
            log: MutationLog::new(db),
        }
    }

    /// Snapshot row for the key, in wire shape.
    pub async fn base_row(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<Value>> {
        let value = match entity_type {
            EntityType::Issue => {
                let row = issues::Entity::find_by_id(key.to_string())
                    .filter(issues::Column::WorkspaceId.eq(workspace_id))
                    .one(self.db)
                    .await?;
                match row {
                    Some(row) => Some(serde_json::to_value(row.into_record()?)?),
                    None => None,
                }
            }
            EntityType::Comment => {
                let row = comments::Entity::find_by_id(key.to_string())
                    .filter(comments::Column::WorkspaceId.eq(workspace_id))
                    .one(self.db)
                    .await?;
                row.map(|row| serde_json::to_value(Comment::from(row)))
                    .transpose()?
            }
            EntityType::Description => {
                let row = descriptions::Entity::find_by_id(key.to_string())
                    .filter(descriptions::Column::WorkspaceId.eq(workspace_id))
                    .one(self.db)
                    .await?;
                row.map(|row| serde_json::to_value(Description::from(row)))
                    .transpose()?
            }
        };

        Ok(value)
    }

    pub async fn resolve(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<Value>> {
        let base = self.base_row(workspace_id, entity_type, key).await?;
        let entries = self.log.find_for_key(workspace_id, entity_type, key).await?;
        Ok(replay(base, &entries))
    }

    pub async fn resolve_as<T: DeserializeOwned>(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<T>> {
        match self.resolve(workspace_id, entity_type, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// CREATE precondition.
    pub async fn ensure_absent(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<()> {
        match self.resolve(workspace_id, entity_type, key).await? {
            Some(_) => Err(SyncError::already_exists(entity_type.as_str(), key)),
            None => Ok(()),
        }
    }

    /// UPDATE precondition. Returns the resolved value.
    pub async fn require_present(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Value> {
        self.resolve(workspace_id, entity_type, key)
            .await?
            .ok_or_else(|| SyncError::not_found(entity_type.as_str(), key))
    }

    /// DELETE precondition: present, and created by the requesting workspace.
    pub async fn require_owned(
        &self,
        workspace_id: &str,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Value> {
        let value = self.require_present(workspace_id, entity_type, key).await?;

        let creator = value.get("creator").and_then(Value::as_str);
        if creator != Some(workspace_id) {
            return Err(SyncError::forbidden(entity_type.as_str(), key, workspace_id));
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn entry(id: i64, method: Method, payload: Option<Value>) -> LogEntry {
        LogEntry {
            id,
            workspace_id: "W1".to_string(),
            entity_type: EntityType::Issue,
            method,
            key: "I1".to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_replay_without_history_keeps_base() {
        let base = json!({"id": "I1", "title": "Bug"});
        assert_eq!(replay(Some(base.clone()), &[]), Some(base));
        assert_eq!(replay(None, &[]), None);
    }

    #[test]
    fn test_replay_merges_updates_over_base() {
        let base = json!({"id": "I1", "title": "Bug", "status": "TODO"});
        let entries = vec![entry(1, Method::Update, Some(json!({"status": "DONE"})))];

        let resolved = replay(Some(base), &entries).unwrap();
        assert_eq!(resolved["status"], json!("DONE"));
        assert_eq!(resolved["title"], json!("Bug"));
    }

    #[test]
    fn test_entries_after_delete_still_apply() {
        let entries = vec![
            entry(1, Method::Create, Some(json!({"id": "I1", "status": "TODO"}))),
            entry(2, Method::Delete, None),
            entry(3, Method::Update, Some(json!({"id": "I1", "status": "DONE"}))),
        ];

        assert_eq!(replay(None, &entries[..2]), None);
        assert_eq!(
            replay(None, &entries),
            Some(json!({"id": "I1", "status": "DONE"}))
        );
    }

    #[test]
    fn test_replay_is_deterministic() {
        let base = Some(json!({"id": "I1", "priority": "LOW"}));
        let entries = vec![
            entry(4, Method::Update, Some(json!({"priority": "HIGH"}))),
            entry(9, Method::Update, Some(json!({"priority": "URGENT", "status": "DONE"}))),
        ];
        assert_eq!(replay(base.clone(), &entries), replay(base, &entries));
    }

    #[test]
    fn test_merge_patch_replaces_non_objects() {
        let mut target = json!("scalar");
        merge_patch(&mut target, &json!({"a": 1}));
        assert_eq!(target, json!({"a": 1}));
    }
}
