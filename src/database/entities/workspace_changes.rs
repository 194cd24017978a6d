use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Mutation log entry
///
/// Rows are only ever inserted. The autoincrement id is the global order of the log.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "workspace_changes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub workspace_id: String,
    pub entity_type: String, // 'ISSUE', 'COMMENT', 'DESCRIPTION'
    pub method: String,      // 'CREATE', 'UPDATE', 'DELETE'
    pub key: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<serde_json::Value>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
