use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::Comment;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub workspace_id: String,
    pub issue_id: String,
    pub body: String,
    pub creator: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Comment {
    fn from(model: Model) -> Self {
        Comment {
            id: model.id,
            body: model.body,
            issue_id: model.issue_id,
            creator: model.creator,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
