use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::SyncResult;
use crate::model::Issue;

/// Issue snapshot row, materialized outside the mutation log
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "issues")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub creator: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_record(self) -> SyncResult<Issue> {
        Ok(Issue {
            status: self.status.parse()?,
            priority: self.priority.parse()?,
            id: self.id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            creator: self.creator,
        })
    }
}
