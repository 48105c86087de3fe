//! Error types for the volume daemon and the node storage agent
//!
//! Every fallible path funnels into [`Error`]; the conversion to
//! [`tonic::Status`] is applied exactly once, at the RPC boundary.

use thiserror::Error;

use crate::lvm::{LvmError, LvmErrorKind};

/// Unified error type for both daemons
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Validation
    // =========================================================================
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    FailedPrecondition(String),

    #[error("insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    #[error("request canceled")]
    Canceled,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Startup / Configuration Errors
    // =========================================================================
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Adapter Errors
    // =========================================================================
    #[error(transparent)]
    Lvm(#[from] LvmError),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the condition may clear on its own and a retry is sensible.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Unavailable(_) | Error::Kube(_) => true,
            Error::Lvm(e) => matches!(e.kind, LvmErrorKind::Transient | LvmErrorKind::Busy),
            _ => false,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        use tonic::Status;

        match &err {
            Error::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            Error::NotFound(_) => Status::not_found(err.to_string()),
            Error::AlreadyExists(_) => Status::already_exists(err.to_string()),
            Error::FailedPrecondition(_) => Status::failed_precondition(err.to_string()),
            Error::InsufficientCapacity { .. } => Status::resource_exhausted(err.to_string()),
            Error::Canceled => Status::cancelled(err.to_string()),
            Error::Unavailable(_) | Error::Kube(_) => Status::unavailable(err.to_string()),
            Error::Lvm(e) => match e.kind {
                LvmErrorKind::NotFound => Status::not_found(err.to_string()),
                LvmErrorKind::AlreadyExists => Status::already_exists(err.to_string()),
                LvmErrorKind::InsufficientSpace => Status::resource_exhausted(err.to_string()),
                // An open LV fails the precondition for removal or resize.
                LvmErrorKind::Busy => Status::failed_precondition(err.to_string()),
                LvmErrorKind::Transient => Status::unavailable(err.to_string()),
                LvmErrorKind::Timeout | LvmErrorKind::Fatal => Status::internal(err.to_string()),
            },
            _ => Status::internal(err.to_string()),
        }
    }
}

/// Result type alias for both daemons
pub type Result<T, E = Error> = std::result::Result<T, E>;
