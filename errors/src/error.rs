use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed source error carried inside [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Scheduler,
    Ledger,
    Orm,
    Hub,
    Auth,
    Resolve,
    Node,
    Request,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Scheduler => write!(f, "scheduler"),
            ErrorKind::Ledger => write!(f, "ledger"),
            ErrorKind::Orm => write!(f, "orm"),
            ErrorKind::Hub => write!(f, "hub"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Resolve => write!(f, "resolve"),
            ErrorKind::Node => write!(f, "node"),
            ErrorKind::Request => write!(f, "request"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_scheduler(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Scheduler)
    }

    pub fn is_ledger(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Ledger)
    }

    pub fn is_resolve(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Resolve)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Auth)
    }

    /// True when the underlying cause is a denied ledger freeze.
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(
            self.source_as::<LedgerError>(),
            Some(LedgerError::InsufficientBalance)
        )
    }

    /// True for boundary rejections that map to HTTP 400: malformed
    /// requests and non-numeric gallery ids.
    pub fn is_validation(&self) -> bool {
        if matches!(
            self.source_as::<ResolveError>(),
            Some(ResolveError::InvalidGalleryId(_))
        ) {
            return true;
        }
        matches!(
            self.source_as::<RequestError>(),
            Some(RequestError::BadRequest(_))
        )
    }

    /// True when a completion was rejected because the lease moved to
    /// another node.
    pub fn is_node_mismatch(&self) -> bool {
        matches!(
            self.source_as::<SchedulerError>(),
            Some(SchedulerError::NodeMismatch)
        )
    }

    fn source_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner
            .source
            .as_ref()
            .and_then(|e| e.downcast_ref::<E>())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("archon::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<SchedulerError> for Error {
    fn from(err: SchedulerError) -> Self {
        Error::new(ErrorKind::Scheduler, Some(err))
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        Error::new(ErrorKind::Ledger, Some(err))
    }
}

impl From<OrmError> for Error {
    fn from(err: OrmError) -> Self {
        Error::new(ErrorKind::Orm, Some(err))
    }
}

impl From<HubError> for Error {
    fn from(err: HubError) -> Self {
        Error::new(ErrorKind::Hub, Some(err))
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::new(ErrorKind::Auth, Some(err))
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        Error::new(ErrorKind::Resolve, Some(err))
    }
}

impl From<NodeError> for Error {
    fn from(err: NodeError) -> Self {
        Error::new(ErrorKind::Node, Some(err))
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::new(ErrorKind::Request, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read failed: {0}")]
    ReadFailed(#[source] BoxError),
    #[error("parse failed: {0}")]
    ParseFailed(#[source] BoxError),
    #[error("missing field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("script failed: {0}")]
    ScriptFailed(#[source] BoxError),
    #[error("unexpected script reply: {0}")]
    UnexpectedReply(String),
    #[error("task is not in a completable state")]
    InvalidState,
    #[error("task reassigned to another node (stale completion)")]
    NodeMismatch,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("account not found")]
    AccountNotFound,
    #[error("transaction failed: {0}")]
    Tx(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum OrmError {
    #[error("connection error: {0}")]
    ConnectionError(#[source] BoxError),
    #[error("query execution error: {0}")]
    QueryExecutionError(#[source] BoxError),
    #[error("record not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("send buffer full")]
    SendBufferFull,
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token format: expected 'node_id:signature'")]
    InvalidTokenFormat,
    #[error("invalid base64 encoding: {0}")]
    InvalidEncoding(#[source] BoxError),
    #[error("signature verification failed for node {0:?}")]
    InvalidSignature(String),
    #[error("invalid verify key: {0}")]
    InvalidVerifyKey(String),
    #[error("unknown api key")]
    UnknownApiKey,
    #[error("account not active")]
    AccountNotActive,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid gallery id: {0}")]
    InvalidGalleryId(String),
    #[error("upstream returned error: {0}")]
    Upstream(String),
    #[error("http request failed: {0}")]
    Http(#[source] BoxError),
    #[error("decode failed: {0}")]
    Decode(#[source] BoxError),
    #[error("upstream returned empty metadata")]
    EmptyMetadata,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("dial failed: {0}")]
    Dial(#[source] BoxError),
    #[error("not connected")]
    NotConnected,
    #[error("send buffer full")]
    SendBufferFull,
    #[error("local task queue full")]
    QueueFull,
    #[error("encode failed: {0}")]
    Encode(#[source] BoxError),
    #[error("archive generation failed: {0}")]
    Archive(String),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_is_detectable_through_the_wrapper() {
        let err: Error = LedgerError::InsufficientBalance.into();
        assert!(err.is_insufficient_balance());
        assert!(err.is_ledger());

        let other: Error = LedgerError::AccountNotFound.into();
        assert!(!other.is_insufficient_balance());
    }

    #[test]
    fn node_mismatch_is_detectable_through_the_wrapper() {
        let err: Error = SchedulerError::NodeMismatch.into();
        assert!(err.is_node_mismatch());

        let other: Error = SchedulerError::InvalidState.into();
        assert!(!other.is_node_mismatch());
    }

    #[test]
    fn display_includes_kind_message_and_source() {
        let err = Error::with_message(
            ErrorKind::Scheduler,
            "publish".to_string(),
            Some(SchedulerError::ConnectionFailed),
        );
        let text = err.to_string();
        assert!(text.contains("scheduler error"));
        assert!(text.contains("publish"));
        assert!(text.contains("connection failed"));
    }
}
