use crate::backend::DataSourceId;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Serialization(serde_json::Error),
    BadRequest(String),
    Internal(String),
    Configuration(String),
    Transaction(TransactionError),
    /// An operation failed and rolling back its unit of work failed as well.
    /// Both errors are kept; `rollback` usually lists the divergent sources.
    RollbackAfterFailure {
        cause: Box<AppError>,
        rollback: Box<AppError>,
    },
}

/// Failures raised by the unit-of-work coordinator.
///
/// These never carry a driver error type directly; whatever the connection
/// source reported is kept as text so the contract stays the same for every
/// backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// The connection source could not hand out a connection. No participant
    /// was recorded for `source`.
    ConnectionAcquisitionFailed { source: DataSourceId, reason: String },
    /// A coordinator method was called with no bound transaction context.
    NoActiveTransaction,
    /// A connection was requested after the context already finalized.
    Finalized,
    /// The caller cancelled while a connection for `source` was being acquired.
    Cancelled { source: DataSourceId },
    /// The outermost commit failed part-way through the sweep.
    ///
    /// `committed` are durably committed and diverge from the rest.
    /// `rolled_back` lists the remaining participants whose rollback
    /// succeeded, `rollback_errors` those whose rollback failed too.
    PartialCommitFailure {
        committed: Vec<DataSourceId>,
        failed: DataSourceId,
        reason: String,
        rolled_back: Vec<DataSourceId>,
        rollback_errors: Vec<RollbackFailure>,
    },
    /// The rollback sweep finished but some participants refused to roll back.
    RollbackFailed(Vec<RollbackFailure>),
}

/// One participant that failed to roll back.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackFailure {
    pub source: DataSourceId,
    pub reason: String,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

fn join_sources(sources: &[DataSourceId]) -> String {
    sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::ConnectionAcquisitionFailed { source, reason } => {
                write!(
                    f,
                    "Failed to acquire connection for data source {}: {}",
                    source, reason
                )
            }
            TransactionError::NoActiveTransaction => {
                write!(f, "No active transaction is bound to this execution scope")
            }
            TransactionError::Finalized => {
                write!(f, "Transaction context has already been finalized")
            }
            TransactionError::Cancelled { source } => {
                write!(
                    f,
                    "Connection acquisition for data source {} was cancelled",
                    source
                )
            }
            TransactionError::PartialCommitFailure {
                committed,
                failed,
                reason,
                rolled_back,
                rollback_errors,
            } => {
                write!(
                    f,
                    "Commit failed for data source {}: {}. Already committed: [{}]. Rolled back: [{}]",
                    failed,
                    reason,
                    join_sources(committed),
                    join_sources(rolled_back)
                )?;
                if !rollback_errors.is_empty() {
                    let errors: Vec<String> =
                        rollback_errors.iter().map(|e| e.to_string()).collect();
                    write!(f, ". Rollback errors: [{}]", errors.join("; "))?;
                }
                Ok(())
            }
            TransactionError::RollbackFailed(failures) => {
                let errors: Vec<String> = failures.iter().map(|e| e.to_string()).collect();
                write!(f, "Rollback failed for: [{}]", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Transaction(e) => write!(f, "Transaction error: {}", e),
            AppError::RollbackAfterFailure { cause, rollback } => {
                write!(f, "{}; rollback also failed: {}", cause, rollback)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Serialization(e) => Some(e),
            AppError::Transaction(e) => Some(e),
            AppError::RollbackAfterFailure { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

impl From<TransactionError> for AppError {
    fn from(err: TransactionError) -> Self {
        AppError::Transaction(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl AppError {
    /// The coordinator error, if this is one
    pub fn as_transaction(&self) -> Option<&TransactionError> {
        match self {
            AppError::Transaction(e) => Some(e),
            _ => None,
        }
    }

    /// Rollback failures reported alongside the original error, if any
    pub fn rollback_failures(&self) -> &[RollbackFailure] {
        match self {
            AppError::Transaction(TransactionError::RollbackFailed(failures)) => failures,
            AppError::RollbackAfterFailure { rollback, .. } => rollback.rollback_failures(),
            _ => &[],
        }
    }

    /// True when some data sources committed and others did not.
    /// Callers must treat this as a hard failure.
    pub fn is_partial_commit(&self) -> bool {
        matches!(
            self,
            AppError::Transaction(TransactionError::PartialCommitFailure { .. })
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
