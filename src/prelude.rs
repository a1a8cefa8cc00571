// Errors
pub use ::errors::{BoxError, Error, ErrorKind, Result};

// Domain model
pub use ::common::model::{
    FetchTask, ParseRequest, ParseResponse, TaskAnnouncement, TaskAssignment, TaskGone,
    TaskResult, TaskStatus, WireMessage,
};

// Core services
pub use ::hub::{Announcer, Hub, NodeAuthenticator, ResultWaiter};
pub use ::ledger::{LedgerService, TxType};
pub use ::scheduler::{run_lease_watchdog, Published, Scheduler};
