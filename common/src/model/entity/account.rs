use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-user GP balance. `balance - frozen` is what a freeze can draw from.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(schema_name = "base", table_name = "account")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub user_id: String,
    pub balance: i64,
    /// GP reserved by in-flight tasks.
    pub frozen: i64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
