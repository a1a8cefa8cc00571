//! Credit-ledger reservation protocol.
//!
//! Funds are frozen before a task is dispatched and settled or refunded at
//! terminal state. Every mutation runs inside a SQL transaction with the
//! account row locked, and leaves an immutable `gp_transaction` row behind.

use chrono::Utc;
use common::model::entity::{account, gp_transaction, AccountColumn, AccountEntity, AccountModel};
use errors::{LedgerError, Result};
use log::debug;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Deposit,
    Deduct,
    Refund,
    Freeze,
    Unfreeze,
    Checkin,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "DEPOSIT",
            TxType::Deduct => "DEDUCT",
            TxType::Refund => "REFUND",
            TxType::Freeze => "FREEZE",
            TxType::Unfreeze => "UNFREEZE",
            TxType::Checkin => "CHECKIN",
        }
    }
}

pub struct LedgerService {
    db: DatabaseConnection,
}

impl LedgerService {
    pub fn new(db: DatabaseConnection) -> Self {
        LedgerService { db }
    }

    /// Returns the user's account, materializing a zero-balance row on first
    /// use.
    pub async fn get_account(&self, user_id: &str) -> Result<AccountModel> {
        if let Some(acc) = self.find_account(user_id).await? {
            return Ok(acc);
        }

        let txn = self.begin().await?;
        let acc = get_or_create_locked(&txn, user_id).await?;
        commit(txn).await?;
        Ok(acc)
    }

    /// Whether `balance - frozen` covers the estimated cost. Missing
    /// accounts can afford nothing but are not an error.
    pub async fn can_afford(&self, user_id: &str, estimated_gp: i64) -> Result<bool> {
        let available = match self.find_account(user_id).await? {
            Some(acc) => available(&acc),
            None => 0,
        };
        Ok(available >= estimated_gp)
    }

    /// Credits the account and records a DEPOSIT (or CHECKIN) row.
    pub async fn deposit(
        &self,
        user_id: &str,
        amount: i64,
        tx_type: TxType,
        remark: &str,
    ) -> Result<AccountModel> {
        let txn = self.begin().await?;
        let acc = get_or_create_locked(&txn, user_id).await?;

        let new_balance = acc.balance + amount;
        let acc = update_account(&txn, acc, new_balance, None).await?;
        record(&txn, user_id, tx_type, amount, acc.balance, None, Some(remark)).await?;

        commit(txn).await?;
        Ok(acc)
    }

    /// Reserves `amount` for an in-flight task. Fails with
    /// [`LedgerError::InsufficientBalance`] when the available balance does
    /// not cover it; no row is written in that case.
    pub async fn freeze(&self, user_id: &str, trace_id: &str, amount: i64) -> Result<()> {
        let txn = self.begin().await?;
        let acc = get_or_create_locked(&txn, user_id).await?;

        if available(&acc) < amount {
            txn.rollback().await.ok();
            return Err(LedgerError::InsufficientBalance.into());
        }

        let new_frozen = acc.frozen + amount;
        let balance = acc.balance;
        let acc = update_account(&txn, acc, balance, Some(new_frozen)).await?;
        record(
            &txn,
            user_id,
            TxType::Freeze,
            -amount,
            acc.balance,
            Some(trace_id),
            None,
        )
        .await?;

        commit(txn).await?;
        debug!("[ledger] froze {amount} GP for user={user_id} trace={trace_id}");
        Ok(())
    }

    /// Finalizes a completed task: releases the reservation and debits the
    /// frozen amount. The user is always charged the estimate; `actual_gp`
    /// is recorded for statistics only.
    pub async fn settle(
        &self,
        user_id: &str,
        trace_id: &str,
        frozen_amount: i64,
        actual_gp: i64,
    ) -> Result<AccountModel> {
        let txn = self.begin().await?;
        let acc = find_locked(&txn, user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        let new_frozen = clamped_release(acc.frozen, frozen_amount);
        record(
            &txn,
            user_id,
            TxType::Unfreeze,
            frozen_amount,
            acc.balance,
            Some(trace_id),
            None,
        )
        .await?;

        let new_balance = acc.balance - frozen_amount;
        let acc = update_account(&txn, acc, new_balance, Some(new_frozen)).await?;
        record(
            &txn,
            user_id,
            TxType::Deduct,
            -frozen_amount,
            acc.balance,
            Some(trace_id),
            Some(&format!("actual_gp={actual_gp}")),
        )
        .await?;

        commit(txn).await?;
        Ok(acc)
    }

    /// Releases a reservation without debiting. Used for failed, timed-out,
    /// cancelled and collapsed requests.
    pub async fn refund(
        &self,
        user_id: &str,
        trace_id: &str,
        frozen_amount: i64,
    ) -> Result<AccountModel> {
        let txn = self.begin().await?;
        let acc = find_locked(&txn, user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        let new_frozen = clamped_release(acc.frozen, frozen_amount);
        let balance = acc.balance;
        let acc = update_account(&txn, acc, balance, Some(new_frozen)).await?;
        record(
            &txn,
            user_id,
            TxType::Refund,
            frozen_amount,
            acc.balance,
            Some(trace_id),
            Some("task failed/cancelled"),
        )
        .await?;

        commit(txn).await?;
        Ok(acc)
    }

    async fn find_account(&self, user_id: &str) -> Result<Option<AccountModel>> {
        AccountEntity::find()
            .filter(AccountColumn::UserId.eq(user_id))
            .one(&self.db)
            .await
            .map_err(db_err)
    }

    async fn begin(&self) -> Result<DatabaseTransaction> {
        self.db.begin().await.map_err(db_err)
    }
}

/// Available balance: what a new freeze can draw from.
pub fn available(acc: &AccountModel) -> i64 {
    acc.balance - acc.frozen
}

/// Frozen funds never go negative, even if a stray double-release slips
/// through.
fn clamped_release(frozen: i64, amount: i64) -> i64 {
    (frozen - amount).max(0)
}

async fn find_locked(
    txn: &DatabaseTransaction,
    user_id: &str,
) -> Result<Option<AccountModel>> {
    AccountEntity::find()
        .filter(AccountColumn::UserId.eq(user_id))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(db_err)
}

async fn get_or_create_locked(txn: &DatabaseTransaction, user_id: &str) -> Result<AccountModel> {
    if let Some(acc) = find_locked(txn, user_id).await? {
        return Ok(acc);
    }

    let now = Utc::now().naive_utc();
    account::ActiveModel {
        user_id: Set(user_id.to_string()),
        balance: Set(0),
        frozen: Set(0),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(db_err)
}

async fn update_account(
    txn: &DatabaseTransaction,
    acc: AccountModel,
    balance: i64,
    frozen: Option<i64>,
) -> Result<AccountModel> {
    let mut active: account::ActiveModel = acc.into();
    active.balance = Set(balance);
    if let Some(frozen) = frozen {
        active.frozen = Set(frozen);
    }
    active.updated_at = Set(Utc::now().naive_utc());
    active.update(txn).await.map_err(db_err)
}

async fn record(
    txn: &DatabaseTransaction,
    user_id: &str,
    tx_type: TxType,
    amount: i64,
    balance_after: i64,
    trace_id: Option<&str>,
    remark: Option<&str>,
) -> Result<()> {
    gp_transaction::ActiveModel {
        user_id: Set(user_id.to_string()),
        tx_type: Set(tx_type.as_str().to_string()),
        amount: Set(amount),
        balance_after: Set(balance_after),
        trace_id: Set(trace_id.map(str::to_string)),
        remark: Set(remark.map(str::to_string)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn commit(txn: DatabaseTransaction) -> Result<()> {
    txn.commit().await.map_err(db_err)
}

fn db_err(e: DbErr) -> errors::Error {
    LedgerError::Tx(Box::new(e)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn account_with(balance: i64, frozen: i64) -> AccountModel {
        AccountModel {
            id: 1,
            user_id: "u1".into(),
            balance,
            frozen,
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn available_subtracts_frozen_funds() {
        assert_eq!(available(&account_with(1000, 400)), 600);
        assert_eq!(available(&account_with(0, 0)), 0);
    }

    #[test]
    fn releasing_more_than_frozen_clamps_at_zero() {
        assert_eq!(clamped_release(500, 500), 0);
        assert_eq!(clamped_release(400, 500), 0);
        assert_eq!(clamped_release(900, 500), 400);
    }

    #[tokio::test]
    async fn can_afford_is_an_exact_boundary() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                vec![account_with(1000, 500)],
                vec![account_with(1000, 500)],
            ])
            .into_connection();
        let ledger = LedgerService::new(db);

        assert!(ledger.can_afford("u1", 500).await.unwrap());
        assert!(!ledger.can_afford("u1", 501).await.unwrap());
    }

    #[tokio::test]
    async fn missing_account_can_afford_nothing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<AccountModel>::new()])
            .into_connection();
        let ledger = LedgerService::new(db);

        assert!(!ledger.can_afford("ghost", 1).await.unwrap());
    }

    #[tokio::test]
    async fn freeze_beyond_available_is_denied_without_writes() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![account_with(100, 0)]])
            .into_connection();
        let ledger = LedgerService::new(db);

        let err = ledger.freeze("u1", "t-1", 500).await.unwrap_err();
        assert!(err.is_insufficient_balance());
    }
}
