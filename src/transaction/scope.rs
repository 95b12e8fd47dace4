use std::future::Future;
use tracing::warn;

use super::{Finalization, TransactionContext};
use crate::backend::{ConnectionSource, DataSourceId};
use crate::error::{AppError, AppResult, TransactionError};

/// Per-task slot for the active transaction context
///
/// Create one per request or worker task and pass it down by `&mut`. There
/// is no thread-local or global lookup, so two tasks multiplexed on one
/// worker thread can never see each other's context.
///
/// The slot holds at most one context. The first [`begin`](Self::begin)
/// binds it and [`close`](Self::close) unbinds it; `close` must run on every
/// exit path, including after a failed commit or rollback.
pub struct ExecutionScope<S: ConnectionSource + Clone> {
    source: S,
    slot: Option<TransactionContext<S>>,
}

impl<S: ConnectionSource + Clone> ExecutionScope<S> {
    pub fn new(source: S) -> Self {
        Self { source, slot: None }
    }

    /// The bound context, if any
    pub fn current(&self) -> Option<&TransactionContext<S>> {
        self.slot.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut TransactionContext<S>> {
        self.slot.as_mut()
    }

    fn bind(&mut self, context: TransactionContext<S>) -> AppResult<()> {
        if self.slot.is_some() {
            return Err(AppError::Internal(
                "Execution scope already has a bound transaction context".to_string(),
            ));
        }
        self.slot = Some(context);
        Ok(())
    }

    fn unbind(&mut self) -> Option<TransactionContext<S>> {
        self.slot.take()
    }

    fn bound(&mut self) -> AppResult<&mut TransactionContext<S>> {
        self.slot
            .as_mut()
            .ok_or_else(|| TransactionError::NoActiveTransaction.into())
    }

    /// Open a unit of work, or a nested scope of the one already bound
    pub fn begin(&mut self) -> AppResult<UnitOfWork<'_, S>> {
        if self.slot.is_none() {
            self.bind(TransactionContext::new(self.source.clone()))?;
        }
        self.bound()?.begin()?;
        Ok(UnitOfWork {
            scope: self,
            finished: false,
        })
    }

    /// Connection for `source` from the bound context
    pub async fn get_connection(
        &mut self,
        source: &DataSourceId,
        want_explicit_transaction: bool,
    ) -> AppResult<&mut S::Connection> {
        self.bound()?
            .get_connection(source, want_explicit_transaction)
            .await
    }

    /// Commit the innermost scope of the bound context
    pub async fn commit(&mut self) -> AppResult<Finalization> {
        self.bound()?.commit().await
    }

    /// Roll back the innermost scope of the bound context
    pub async fn rollback(&mut self) -> AppResult<Finalization> {
        self.bound()?.rollback().await
    }

    /// Release every participant and unbind the context
    ///
    /// Safe to call when nothing is bound.
    pub async fn close(&mut self) {
        if let Some(context) = self.unbind() {
            context.close().await;
        }
    }
}

impl<S: ConnectionSource + Clone> Drop for ExecutionScope<S> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            warn!("Execution scope dropped without close; participants are dropped unreleased");
        }
    }
}

/// Caller-facing handle for one (possibly nested) scope of a unit of work
///
/// Ends with [`commit`](Self::commit) or [`rollback`](Self::rollback).
/// Dropping it without either counts as a rollback request; the I/O for it
/// happens when the execution scope is closed.
pub struct UnitOfWork<'a, S: ConnectionSource + Clone> {
    scope: &'a mut ExecutionScope<S>,
    finished: bool,
}

impl<'a, S: ConnectionSource + Clone> UnitOfWork<'a, S> {
    /// Connection for `source` in explicit-transaction mode
    pub async fn connection(&mut self, source: &DataSourceId) -> AppResult<&mut S::Connection> {
        self.scope.get_connection(source, true).await
    }

    /// Connection for `source`, leaving auto-commit alone unless asked
    pub async fn connection_with_mode(
        &mut self,
        source: &DataSourceId,
        want_explicit_transaction: bool,
    ) -> AppResult<&mut S::Connection> {
        self.scope
            .get_connection(source, want_explicit_transaction)
            .await
    }

    /// Connection for `source`, giving up if `cancel` fires before the pool answers
    pub async fn connection_or_cancel<F>(
        &mut self,
        source: &DataSourceId,
        cancel: F,
    ) -> AppResult<&mut S::Connection>
    where
        F: Future<Output = ()>,
    {
        self.scope
            .bound()?
            .get_connection_or_cancel(source, true, cancel)
            .await
    }

    /// Open a nested scope on the same context
    pub fn begin(&mut self) -> AppResult<UnitOfWork<'_, S>> {
        self.scope.begin()
    }

    /// Current nesting depth
    pub fn depth(&self) -> usize {
        self.scope.current().map(|c| c.depth()).unwrap_or(0)
    }

    /// The bound context
    pub fn context(&self) -> Option<&TransactionContext<S>> {
        self.scope.current()
    }

    pub async fn commit(mut self) -> AppResult<Finalization> {
        self.finished = true;
        self.scope.commit().await
    }

    pub async fn rollback(mut self) -> AppResult<Finalization> {
        self.finished = true;
        self.scope.rollback().await
    }
}

impl<S: ConnectionSource + Clone> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(context) = self.scope.current_mut() {
                context.abandon();
            }
        }
    }
}
