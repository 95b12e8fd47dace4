use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tracing::warn;

use crate::backend::ParticipantConnection;
use crate::error::{AppError, AppResult};

/// SQLite connection taking part in a unit of work
///
/// Auto-commit is SQLite's default. Turning it off issues `BEGIN` and the
/// connection stays inside that transaction until `COMMIT` or `ROLLBACK`.
pub struct SqliteParticipant {
    conn: PoolConnection<Sqlite>,
    in_transaction: bool,
}

impl SqliteParticipant {
    pub fn new(conn: PoolConnection<Sqlite>) -> Self {
        Self {
            conn,
            in_transaction: false,
        }
    }

    /// Raw connection for running statements inside the unit of work
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Whether an explicit transaction is still open
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn run(&mut self, statement: &str) -> AppResult<()> {
        sqlx::query(statement)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| AppError::Database(format!("SQLite {} failed: {}", statement, e)))?;
        Ok(())
    }
}

#[async_trait]
impl ParticipantConnection for SqliteParticipant {
    fn is_auto_commit(&self) -> bool {
        !self.in_transaction
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> AppResult<()> {
        if auto_commit {
            // Leaving explicit mode commits whatever is pending
            if self.in_transaction {
                self.run("COMMIT").await?;
                self.in_transaction = false;
            }
        } else {
            // Not guarded: a second BEGIN is rejected by SQLite itself
            self.run("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.run("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> AppResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.run("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for SqliteParticipant {
    fn drop(&mut self) {
        if self.in_transaction {
            // Never hand a connection with an open transaction back to the pool
            warn!("SQLite participant dropped inside an open transaction; closing connection");
            self.conn.close_on_drop();
        }
    }
}
