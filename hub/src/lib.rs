pub mod auth;
pub mod connection;
pub mod hub;
pub mod waiter;

pub use auth::NodeAuthenticator;
pub use hub::{Announcer, Hub};
pub use waiter::{ResultWaiter, WaiterSlot};
