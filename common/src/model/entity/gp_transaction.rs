use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Immutable ledger row. One row per balance mutation, typed
/// DEPOSIT | DEDUCT | REFUND | FREEZE | UNFREEZE | CHECKIN.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(schema_name = "base", table_name = "gp_transaction")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub tx_type: String,
    /// Positive = credit, negative = debit.
    pub amount: i64,
    pub balance_after: i64,
    pub trace_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub remark: Option<String>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
