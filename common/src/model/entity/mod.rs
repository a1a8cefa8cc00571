pub mod account;
pub mod gp_transaction;
pub mod task_log;
pub mod user;

pub use account::Column as AccountColumn;
pub use account::Entity as AccountEntity;
pub use account::Model as AccountModel;
pub use gp_transaction::Column as GpTransactionColumn;
pub use gp_transaction::Entity as GpTransactionEntity;
pub use gp_transaction::Model as GpTransactionModel;
pub use task_log::Column as TaskLogColumn;
pub use task_log::Entity as TaskLogEntity;
pub use task_log::Model as TaskLogModel;
pub use user::Column as UserColumn;
pub use user::Entity as UserEntity;
pub use user::Model as UserModel;

pub mod prelude {
    pub use super::account::Entity as AccountEntity;
    pub use super::gp_transaction::Entity as GpTransactionEntity;
    pub use super::task_log::Entity as TaskLogEntity;
    pub use super::user::Entity as UserEntity;
}
