use chrono::{Datelike, NaiveDateTime, Utc};
use common::model::entity::{user, UserColumn, UserEntity, UserModel};
use errors::{OrmError, Result};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

/// Account lookup and key management for the HTTP surface.
pub struct UserService {
    db: DatabaseConnection,
}

impl UserService {
    pub fn new(db: DatabaseConnection) -> Self {
        UserService { db }
    }

    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<UserModel>> {
        UserEntity::find()
            .filter(UserColumn::ApiKey.eq(api_key))
            .one(&self.db)
            .await
            .map_err(|e| OrmError::QueryExecutionError(Box::new(e)).into())
    }

    pub async fn reset_api_key(&self, user_id: &str) -> Result<UserModel> {
        let existing = UserEntity::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(|e| OrmError::QueryExecutionError(Box::new(e)))?
            .ok_or(OrmError::NotFound)?;

        let mut active: user::ActiveModel = existing.into();
        active.api_key = Set(generate_api_key());
        active
            .update(&self.db)
            .await
            .map_err(|e| OrmError::QueryExecutionError(Box::new(e)).into())
    }

    pub async fn record_checkin(&self, user_id: &str) -> Result<UserModel> {
        let existing = UserEntity::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(|e| OrmError::QueryExecutionError(Box::new(e)))?
            .ok_or(OrmError::NotFound)?;

        let mut active: user::ActiveModel = existing.into();
        active.last_checkin_at = Set(Some(Utc::now().naive_utc()));
        active
            .update(&self.db)
            .await
            .map_err(|e| OrmError::QueryExecutionError(Box::new(e)).into())
    }
}

pub fn generate_api_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Check-in is once per calendar day, not a rolling 24 hours.
pub fn checked_in_today(last: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
    match last {
        Some(last) => last.year() == now.year() && last.ordinal() == now.ordinal(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn same_calendar_day_counts_as_checked_in() {
        assert!(checked_in_today(Some(at(2025, 3, 1, 0)), at(2025, 3, 1, 23)));
    }

    #[test]
    fn midnight_rollover_resets_eligibility() {
        assert!(!checked_in_today(Some(at(2025, 3, 1, 23)), at(2025, 3, 2, 0)));
        // Same ordinal day in a different year does not count.
        assert!(!checked_in_today(Some(at(2024, 3, 1, 12)), at(2025, 3, 1, 12)));
    }

    #[test]
    fn never_checked_in_is_eligible() {
        assert!(!checked_in_today(None, at(2025, 3, 1, 12)));
    }

    #[test]
    fn api_keys_are_hex_and_unique_enough() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
