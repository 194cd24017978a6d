use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Entity types recorded in the mutation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Issue,
    Comment,
    Description,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Issue, EntityType::Comment, EntityType::Description];

    /// Value stored in the `entity_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Issue => "ISSUE",
            EntityType::Comment => "COMMENT",
            EntityType::Description => "DESCRIPTION",
        }
    }

    /// Collection name used by the mutation RPCs and the client schema.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Issue => "issue",
            EntityType::Comment => "comment",
            EntityType::Description => "description",
        }
    }

    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.collection() == collection)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("unknown entity type '{}'", s)))
    }
}

impl From<EntityType> for String {
    fn from(entity_type: EntityType) -> Self {
        entity_type.as_str().to_string()
    }
}

/// Mutation method of a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Create,
    Update,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "CREATE",
            Method::Update => "UPDATE",
            Method::Delete => "DELETE",
        }
    }

    /// CREATE and UPDATE carry a full value, DELETE carries none.
    pub fn carries_payload(&self) -> bool {
        !matches!(self, Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Method::Create),
            "UPDATE" => Ok(Method::Update),
            "DELETE" => Ok(Method::Delete),
            other => Err(SyncError::Validation(format!("unknown method '{}'", other))),
        }
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_column_values_parse_back() {
        for entity_type in EntityType::ALL {
            let stored: String = entity_type.into();
            assert_eq!(stored.parse::<EntityType>().unwrap(), entity_type);
        }
        assert!("WORKSPACE".parse::<EntityType>().is_err());
    }

    #[test]
    fn collections_map_to_entity_types() {
        assert_eq!(EntityType::from_collection("comment"), Some(EntityType::Comment));
        assert_eq!(EntityType::from_collection("cursorMeta"), None);
    }

    #[test]
    fn delete_carries_no_payload() {
        assert!(Method::Create.carries_payload());
        assert!(Method::Update.carries_payload());
        assert!(!Method::Delete.carries_payload());
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
    }
}
