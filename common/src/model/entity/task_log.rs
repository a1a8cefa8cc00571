use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only audit record, one row per published task. Written
/// asynchronously and allowed to lag behind the Redis state.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(schema_name = "base", table_name = "task_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub trace_id: String,
    pub user_id: String,
    pub gallery_id: String,
    pub gallery_key: String,
    pub node_id: Option<String>,
    pub status: String,
    pub force: bool,
    pub free_tier: bool,
    pub estimated_gp: i64,
    pub actual_gp: i64,
    pub created_at: DateTime,
    pub finished_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
