//! Unit-of-work coordination across several data sources
//!
//! A caller opens a unit of work on its [`ExecutionScope`], passes the
//! resulting [`UnitOfWork`] handle down the call chain, and nested calls
//! open and close inner scopes on it. Only the outermost commit or rollback
//! talks to the databases, once per participant, in acquisition order.
//!
//! ```text
//! ExecutionScope (one per request / task, passed by value)
//!     └── TransactionContext (depth, failed flag, ordered participants)
//!             └── ConnectionSource::acquire / release
//! ```

mod context;
mod scope;

pub use context::{ContextState, TransactionContext};
pub use scope::{ExecutionScope, UnitOfWork};

/// What a commit or rollback call actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// An inner scope closed; nothing was sent to any data source
    Deferred,
    /// The outermost scope committed every participant
    Committed,
    /// The outermost scope rolled back every participant
    RolledBack,
}

impl Finalization {
    pub fn is_final(&self) -> bool {
        !matches!(self, Finalization::Deferred)
    }
}
