//! Crate-wide error taxonomy.
//!
//! Covers transient I/O that should be retried with backoff, protocol
//! frame errors that may allow a resync, rejections at login, expression
//! errors scoped to a single rule evaluation, and terminal dispatch/
//! command failures. Subsystem errors compose into `CoreError` at the
//! points where subsystems actually meet (the gateway's per-connection
//! task, the pipeline's persist step).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unsupported command for this protocol")]
    UnsupportedCommand,
    #[error("buffer exceeded cap ({0} bytes accumulated without a complete frame)")]
    BufferOverflow(usize),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("device {0} not found")]
    DeviceNotFound(String),
}

impl PersistError {
    /// Whether this failure is worth retrying with backoff (connection
    /// pool exhaustion, network blip) versus a logic error that will never
    /// succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            PersistError::Db(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            PersistError::DeviceNotFound(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("position rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no live session for device {0}")]
    NoSession(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
