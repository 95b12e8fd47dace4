use std::future::Future;
use tracing::{debug, error, info, warn};

use super::Finalization;
use crate::backend::{ConnectionSource, DataSourceId, ParticipantConnection};
use crate::error::{AppError, AppResult, RollbackFailure, TransactionError};

/// Lifecycle of a transaction context
///
/// `Active` covers every nesting depth. Once the outermost scope commits or
/// rolls back the context is `Finalized`; a handle dropped without either
/// leaves it `Abandoned`. Neither state goes back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Finalized,
    Abandoned,
}

struct Participant<C> {
    source: DataSourceId,
    connection: C,
}

/// Bookkeeping for one unit of work
///
/// Holds at most one connection per data source, kept in the order the
/// sources were first touched. That order drives both the commit sweep and
/// the rollback sweep.
pub struct TransactionContext<S: ConnectionSource> {
    source: S,
    participants: Vec<Participant<S::Connection>>,
    depth: usize,
    failed: bool,
    state: ContextState,
}

impl<S: ConnectionSource> TransactionContext<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            participants: Vec::new(),
            depth: 0,
            failed: false,
            state: ContextState::Active,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether some scope already asked for a rollback
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Data sources touched so far, in acquisition order
    pub fn participant_sources(&self) -> Vec<DataSourceId> {
        self.participants.iter().map(|p| p.source.clone()).collect()
    }

    fn ensure_active(&self) -> AppResult<()> {
        match self.state {
            ContextState::Active => Ok(()),
            ContextState::Finalized | ContextState::Abandoned => {
                Err(TransactionError::Finalized.into())
            }
        }
    }

    fn position(&self, source: &DataSourceId) -> Option<usize> {
        self.participants.iter().position(|p| &p.source == source)
    }

    /// Open a (possibly nested) scope. Pure bookkeeping.
    pub fn begin(&mut self) -> AppResult<usize> {
        self.ensure_active()?;
        self.depth += 1;
        debug!(depth = self.depth, "Begin unit of work");
        Ok(self.depth)
    }

    /// Connection for `source`, acquiring one on first use
    ///
    /// With `want_explicit_transaction` the connection is switched out of
    /// auto-commit mode, but only if it is still in it.
    pub async fn get_connection(
        &mut self,
        source: &DataSourceId,
        want_explicit_transaction: bool,
    ) -> AppResult<&mut S::Connection> {
        self.get_connection_or_cancel(source, want_explicit_transaction, std::future::pending())
            .await
    }

    /// Same as [`get_connection`](Self::get_connection), but gives up when
    /// `cancel` resolves before the pool produced a connection.
    ///
    /// Cancellation is only observed here. Once a participant is registered
    /// the commit and rollback sweeps always run to completion.
    pub async fn get_connection_or_cancel<F>(
        &mut self,
        source: &DataSourceId,
        want_explicit_transaction: bool,
        cancel: F,
    ) -> AppResult<&mut S::Connection>
    where
        F: Future<Output = ()>,
    {
        self.ensure_active()?;

        let index = match self.position(source) {
            Some(index) => {
                let connection = &mut self.participants[index].connection;
                if want_explicit_transaction && connection.is_auto_commit() {
                    // Participant stays registered, still in auto-commit mode
                    connection
                        .set_auto_commit(false)
                        .await
                        .map_err(|e| acquisition_failed(source, &e))?;
                }
                index
            }
            None => {
                // A cancel that already fired wins over a ready connection
                let acquired = tokio::select! {
                    biased;
                    _ = cancel => {
                        debug!(source = %source, "Connection acquisition cancelled");
                        return Err(TransactionError::Cancelled { source: source.clone() }.into());
                    }
                    result = self.source.acquire(source) => result,
                };
                let mut connection = acquired.map_err(|e| acquisition_failed(source, &e))?;

                if want_explicit_transaction && connection.is_auto_commit() {
                    if let Err(e) = connection.set_auto_commit(false).await {
                        self.source.release(connection).await;
                        return Err(acquisition_failed(source, &e));
                    }
                }

                debug!(source = %source, "Registered participant");
                self.participants.push(Participant {
                    source: source.clone(),
                    connection,
                });
                self.participants.len() - 1
            }
        };

        Ok(&mut self.participants[index].connection)
    }

    fn leave_scope(&mut self) -> AppResult<()> {
        if self.depth == 0 {
            return Err(TransactionError::NoActiveTransaction.into());
        }
        self.depth -= 1;
        Ok(())
    }

    /// Close the innermost scope, committing everything if it was the outermost
    ///
    /// If any scope rolled back, the outermost commit rolls back instead.
    pub async fn commit(&mut self) -> AppResult<Finalization> {
        self.ensure_active()?;
        self.leave_scope()?;

        if self.depth > 0 {
            debug!(depth = self.depth, "Nested commit deferred");
            return Ok(Finalization::Deferred);
        }

        if self.failed {
            info!("Commit requested after a nested rollback; rolling back unit of work");
            return self.rollback_all().await;
        }

        self.commit_all().await
    }

    /// Close the innermost scope and veto the eventual commit
    pub async fn rollback(&mut self) -> AppResult<Finalization> {
        self.ensure_active()?;
        self.leave_scope()?;
        self.failed = true;

        if self.depth > 0 {
            debug!(depth = self.depth, "Nested rollback recorded");
            return Ok(Finalization::Deferred);
        }

        self.rollback_all().await
    }

    async fn commit_all(&mut self) -> AppResult<Finalization> {
        self.state = ContextState::Finalized;

        let mut committed = Vec::new();
        for index in 0..self.participants.len() {
            let participant = &mut self.participants[index];
            match participant.connection.commit().await {
                Ok(()) => committed.push(participant.source.clone()),
                Err(e) => {
                    let failed = participant.source.clone();
                    error!(
                        source = %failed,
                        committed = ?committed,
                        "Commit failed after other data sources committed: {}",
                        e
                    );
                    let (rolled_back, rollback_errors) = self.rollback_from(index).await;
                    return Err(TransactionError::PartialCommitFailure {
                        committed,
                        failed,
                        reason: e.to_string(),
                        rolled_back,
                        rollback_errors,
                    }
                    .into());
                }
            }
        }

        info!(participants = committed.len(), "Unit of work committed");
        Ok(Finalization::Committed)
    }

    async fn rollback_all(&mut self) -> AppResult<Finalization> {
        self.state = ContextState::Finalized;

        let (rolled_back, failures) = self.rollback_from(0).await;
        if !failures.is_empty() {
            return Err(TransactionError::RollbackFailed(failures).into());
        }

        info!(participants = rolled_back.len(), "Unit of work rolled back");
        Ok(Finalization::RolledBack)
    }

    /// Best-effort rollback of every participant from `start` on
    async fn rollback_from(
        &mut self,
        start: usize,
    ) -> (Vec<DataSourceId>, Vec<RollbackFailure>) {
        let mut rolled_back = Vec::new();
        // Allocated on the first failure only
        let mut failures: Option<Vec<RollbackFailure>> = None;

        for participant in self.participants.iter_mut().skip(start) {
            match participant.connection.rollback().await {
                Ok(()) => rolled_back.push(participant.source.clone()),
                Err(e) => {
                    error!(source = %participant.source, "Rollback failed: {}", e);
                    failures.get_or_insert_with(Vec::new).push(RollbackFailure {
                        source: participant.source.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (rolled_back, failures.unwrap_or_default())
    }

    /// Record a scope that ended without commit or rollback
    ///
    /// Synchronous, so no I/O: the scope vetoes the commit, and if it was
    /// the outermost one the open transactions are left for `close` to drop.
    pub(crate) fn abandon(&mut self) {
        if self.state != ContextState::Active || self.depth == 0 {
            return;
        }
        self.failed = true;
        self.depth -= 1;
        warn!(depth = self.depth, "Unit of work scope dropped without commit or rollback");
        if self.depth == 0 {
            self.state = ContextState::Abandoned;
        }
    }

    /// Release every participant back to its source, whatever happened before
    pub async fn close(self) {
        if self.depth > 0 {
            warn!(depth = self.depth, "Closing transaction context with open scopes");
        }
        let released = self.participants.len();
        for participant in self.participants {
            self.source.release(participant.connection).await;
        }
        debug!(released, "Transaction context closed");
    }
}

fn acquisition_failed(source: &DataSourceId, cause: &AppError) -> AppError {
    error!(source = %source, "Failed to acquire connection: {}", cause);
    TransactionError::ConnectionAcquisitionFailed {
        source: source.clone(),
        reason: cause.to_string(),
    }
    .into()
}
