pub mod error;

pub use error::{
    AuthError, BoxError, ConfigError, Error, ErrorKind, HubError, LedgerError, NodeError,
    OrmError, RequestError, ResolveError, Result, SchedulerError,
};
