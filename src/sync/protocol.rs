use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{SyncError, SyncResult};
use crate::model::{Comment, Description, EntityType, Issue, IssuePriority, IssueStatus};

/// Key under which cursor metadata markers are delivered.
pub const META_KEY: &str = "meta";

/// One change record in a pull response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Change<T> {
    Created { key: String, value: T },
    Updated { key: String, value: T },
    Deleted { key: String },
    /// Discard everything previously synced for this collection
    Clear,
}

impl<T> Change<T> {
    pub fn key(&self) -> Option<&str> {
        match self {
            Change::Created { key, .. } | Change::Updated { key, .. } | Change::Deleted { key } => {
                Some(key)
            }
            Change::Clear => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    PartialSyncIncomplete,
    PartialSyncComplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorMeta {
    pub status: SyncStatus,
}

impl Change<CursorMeta> {
    pub fn meta(status: SyncStatus) -> Self {
        Change::Created {
            key: META_KEY.to_string(),
            value: CursorMeta { status },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub issue: Vec<Change<Issue>>,
    pub comment: Vec<Change<Comment>>,
    pub description: Vec<Change<Description>>,
    pub cursor_meta: Vec<Change<CursorMeta>>,
}

impl ChangeSet {
    /// True when no entity changes were delivered; cursor metadata is not counted.
    pub fn is_empty(&self) -> bool {
        self.issue.is_empty() && self.comment.is_empty() && self.description.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issue.len() + self.comment.len() + self.description.len()
    }

    /// Status carried by the last metadata marker, if any.
    pub fn status(&self) -> Option<SyncStatus> {
        self.cursor_meta.iter().rev().find_map(|change| match change {
            Change::Created { value, .. } | Change::Updated { value, .. } => Some(value.status),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub change: ChangeSet,
    pub cursor: String,
    pub last_processed_mutation_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReceipt {
    pub server_mutation_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewComment {
    pub id: String,
    pub body: String,
    pub creator: String,
    pub issue_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "lowercase")]
pub enum CreateRequest {
    #[serde(rename_all = "camelCase")]
    Comment {
        workspace_id: String,
        params: NewComment,
    },
}

impl CreateRequest {
    pub fn workspace_id(&self) -> &str {
        match self {
            CreateRequest::Comment { workspace_id, .. } => workspace_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<IssuePriority>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodyDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateParams<D> {
    pub id: String,
    pub delta: D,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "lowercase")]
pub enum UpdateRequest {
    #[serde(rename_all = "camelCase")]
    Issue {
        workspace_id: String,
        params: UpdateParams<IssueDelta>,
    },
    #[serde(rename_all = "camelCase")]
    Comment {
        workspace_id: String,
        params: UpdateParams<BodyDelta>,
    },
    #[serde(rename_all = "camelCase")]
    Description {
        workspace_id: String,
        params: UpdateParams<BodyDelta>,
    },
}

impl UpdateRequest {
    pub fn workspace_id(&self) -> &str {
        match self {
            UpdateRequest::Issue { workspace_id, .. }
            | UpdateRequest::Comment { workspace_id, .. }
            | UpdateRequest::Description { workspace_id, .. } => workspace_id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            UpdateRequest::Issue { .. } => EntityType::Issue,
            UpdateRequest::Comment { .. } => EntityType::Comment,
            UpdateRequest::Description { .. } => EntityType::Description,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            UpdateRequest::Issue { params, .. } => &params.id,
            UpdateRequest::Comment { params, .. } | UpdateRequest::Description { params, .. } => {
                &params.id
            }
        }
    }

    /// The delta as a JSON object holding only the fields being changed.
    pub fn delta_value(&self) -> SyncResult<Value> {
        let value = match self {
            UpdateRequest::Issue { params, .. } => serde_json::to_value(&params.delta)?,
            UpdateRequest::Comment { params, .. } | UpdateRequest::Description { params, .. } => {
                serde_json::to_value(&params.delta)?
            }
        };
        Ok(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "lowercase")]
pub enum DeleteRequest {
    #[serde(rename_all = "camelCase")]
    Issue { workspace_id: String, key: String },
    #[serde(rename_all = "camelCase")]
    Comment { workspace_id: String, key: String },
}

impl DeleteRequest {
    pub fn workspace_id(&self) -> &str {
        match self {
            DeleteRequest::Issue { workspace_id, .. } | DeleteRequest::Comment { workspace_id, .. } => {
                workspace_id
            }
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            DeleteRequest::Issue { .. } => EntityType::Issue,
            DeleteRequest::Comment { .. } => EntityType::Comment,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            DeleteRequest::Issue { key, .. } | DeleteRequest::Comment { key, .. } => key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewIssue {
    pub id: String,
    pub title: String,
    pub priority: IssuePriority,
    pub status: IssueStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewDescription {
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNewIssueRequest {
    pub workspace_id: String,
    pub issue: NewIssue,
    pub description: NewDescription,
}

/// Mutation bodies discriminated by a `collection` field.
pub trait CollectionRequest: DeserializeOwned {
    const OPERATION: &'static str;
    const ACCEPTS: &'static [EntityType];

    /// Parse a raw body. A collection naming a real entity type that this operation does not
    /// accept is `Unsupported`; any other malformed input is a `Validation` failure.
    fn from_json(body: Value) -> SyncResult<Self> {
        let collection = body
            .get("collection")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::Validation("missing collection".to_string()))?;

        match EntityType::from_collection(&collection) {
            Some(entity_type) if Self::ACCEPTS.contains(&entity_type) => {
                serde_json::from_value(body).map_err(|e| SyncError::Validation(e.to_string()))
            }
            Some(_) => Err(SyncError::Unsupported(format!(
                "{} on collection '{}'",
                Self::OPERATION,
                collection
            ))),
            None => Err(SyncError::Validation(format!(
                "unknown collection '{}'",
                collection
            ))),
        }
    }
}

impl CollectionRequest for CreateRequest {
    const OPERATION: &'static str = "create";
    const ACCEPTS: &'static [EntityType] = &[EntityType::Comment];
}

impl CollectionRequest for UpdateRequest {
    const OPERATION: &'static str = "update";
    const ACCEPTS: &'static [EntityType] =
        &[EntityType::Issue, EntityType::Comment, EntityType::Description];
}

impl CollectionRequest for DeleteRequest {
    const OPERATION: &'static str = "delete";
    const ACCEPTS: &'static [EntityType] = &[EntityType::Issue, EntityType::Comment];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_wire_shape() {
        let deleted: Change<Comment> = Change::Deleted { key: "C1".to_string() };
        assert_eq!(
            serde_json::to_value(&deleted).unwrap(),
            json!({"action": "DELETED", "key": "C1"})
        );
        let clear: Change<Issue> = Change::Clear;
        assert_eq!(serde_json::to_value(&clear).unwrap(), json!({"action": "CLEAR"}));
    }

    #[test]
    fn test_meta_marker() {
        let marker = Change::meta(SyncStatus::PartialSyncComplete);
        assert_eq!(
            serde_json::to_value(&marker).unwrap(),
            json!({"action": "CREATED", "key": "meta", "value": {"status": "PARTIAL_SYNC_COMPLETE"}})
        );

        let set = ChangeSet {
            cursor_meta: vec![Change::Clear, marker],
            ..Default::default()
        };
        assert_eq!(set.status(), Some(SyncStatus::PartialSyncComplete));
        assert!(set.is_empty());
    }

    #[test]
    fn test_update_request_parses_issue_delta() {
        let request = UpdateRequest::from_json(json!({
            "collection": "issue",
            "workspaceId": "W1",
            "params": {"id": "I1", "delta": {"status": "DONE"}}
        }))
        .unwrap();

        assert_eq!(request.entity_type(), EntityType::Issue);
        assert_eq!(request.key(), "I1");
        assert_eq!(request.delta_value().unwrap(), json!({"status": "DONE"}));
    }

    #[test]
    fn test_delta_rejects_fields_outside_collection() {
        let err = UpdateRequest::from_json(json!({
            "collection": "comment",
            "workspaceId": "W1",
            "params": {"id": "C1", "delta": {"status": "DONE"}}
        }))
        .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_known_collection_not_accepted_is_unsupported() {
        let err = DeleteRequest::from_json(json!({
            "collection": "description",
            "workspaceId": "W1",
            "key": "I1"
        }))
        .unwrap_err();
        assert_eq!(err.error_code(), "NOT_IMPLEMENTED");

        let err = CreateRequest::from_json(json!({
            "collection": "board",
            "workspaceId": "W1",
            "params": {}
        }))
        .unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }
}
