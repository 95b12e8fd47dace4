pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod startup;
pub mod store;
pub mod transaction;

// Re-export commonly used types for easier access
pub use backend::{ConnectionSource, DataSourceId, ParticipantConnection};
pub use error::{AppError, AppResult, TransactionError};
pub use transaction::{ExecutionScope, Finalization, TransactionContext, UnitOfWork};
