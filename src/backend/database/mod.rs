//! Pooled data sources backed by sqlx
//!
//! Every configured data source owns one sqlx pool. `PooledDataSources`
//! implements [`ConnectionSource`] over all of them, so a single unit of work
//! can hold SQLite and PostgreSQL participants side by side.
//!
//! # Architecture
//!
//! ```text
//! TransactionContext
//!     ↓ acquire / release
//! PooledDataSources (one pool per DataSourceId)
//!     ├── postgres/ (PostgreSQL participants)
//!     └── sqlite/   (SQLite participants)
//! ```

pub mod config;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgConnection, PgPool, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::backend::{ConnectionSource, DataSourceId, DatabaseType, ParticipantConnection};
use crate::error::{AppError, AppResult};

pub use config::DataSourceConfig;
pub use postgres::PostgresParticipant;
pub use sqlite::SqliteParticipant;

/// Pool behind one data source
#[derive(Debug, Clone)]
pub enum DataSourcePool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl DataSourcePool {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            DataSourcePool::Sqlite(_) => DatabaseType::SQLite,
            DataSourcePool::Postgres(_) => DatabaseType::PostgreSQL,
        }
    }
}

/// Connection handed out by [`PooledDataSources`]
pub enum PooledConnection {
    Sqlite(SqliteParticipant),
    Postgres(PostgresParticipant),
}

impl PooledConnection {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            PooledConnection::Sqlite(_) => DatabaseType::SQLite,
            PooledConnection::Postgres(_) => DatabaseType::PostgreSQL,
        }
    }

    pub fn as_sqlite(&mut self) -> Option<&mut SqliteConnection> {
        match self {
            PooledConnection::Sqlite(p) => Some(p.connection()),
            PooledConnection::Postgres(_) => None,
        }
    }

    pub fn as_postgres(&mut self) -> Option<&mut PgConnection> {
        match self {
            PooledConnection::Postgres(p) => Some(p.connection()),
            PooledConnection::Sqlite(_) => None,
        }
    }

    /// Whether an explicit transaction is still open
    pub fn in_transaction(&self) -> bool {
        match self {
            PooledConnection::Sqlite(p) => p.in_transaction(),
            PooledConnection::Postgres(p) => p.in_transaction(),
        }
    }
}

#[async_trait]
impl ParticipantConnection for PooledConnection {
    fn is_auto_commit(&self) -> bool {
        match self {
            PooledConnection::Sqlite(p) => p.is_auto_commit(),
            PooledConnection::Postgres(p) => p.is_auto_commit(),
        }
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> AppResult<()> {
        match self {
            PooledConnection::Sqlite(p) => p.set_auto_commit(auto_commit).await,
            PooledConnection::Postgres(p) => p.set_auto_commit(auto_commit).await,
        }
    }

    async fn commit(&mut self) -> AppResult<()> {
        match self {
            PooledConnection::Sqlite(p) => p.commit().await,
            PooledConnection::Postgres(p) => p.commit().await,
        }
    }

    async fn rollback(&mut self) -> AppResult<()> {
        match self {
            PooledConnection::Sqlite(p) => p.rollback().await,
            PooledConnection::Postgres(p) => p.rollback().await,
        }
    }
}

/// Connection source over a fixed set of sqlx pools
#[derive(Debug, Default, Clone)]
pub struct PooledDataSources {
    pools: HashMap<DataSourceId, DataSourcePool>,
}

impl PooledDataSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already connected SQLite pool
    pub fn with_sqlite_pool(mut self, id: impl Into<DataSourceId>, pool: SqlitePool) -> Self {
        self.pools.insert(id.into(), DataSourcePool::Sqlite(pool));
        self
    }

    /// Register an already connected PostgreSQL pool
    pub fn with_postgres_pool(mut self, id: impl Into<DataSourceId>, pool: PgPool) -> Self {
        self.pools.insert(id.into(), DataSourcePool::Postgres(pool));
        self
    }

    /// Connect a pool for every configuration entry
    pub async fn connect_all(configs: &[DataSourceConfig]) -> AppResult<Self> {
        let mut sources = Self::new();
        for config in configs {
            if sources.pools.contains_key(&config.id) {
                return Err(AppError::Configuration(format!(
                    "Duplicate data source id: {}",
                    config.id
                )));
            }
            let pool = Self::connect(config).await?;
            info!(source = %config.id, "Connected data source");
            sources.pools.insert(config.id.clone(), pool);
        }
        Ok(sources)
    }

    async fn connect(config: &DataSourceConfig) -> AppResult<DataSourcePool> {
        config.validate().map_err(|e| {
            AppError::Configuration(format!("Invalid data source {}: {}", config.id, e))
        })?;

        let timeout = Duration::from_secs(config.connection_timeout);
        match config.database_type {
            DatabaseType::PostgreSQL => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect(&config.connection_url)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to connect to PostgreSQL data source {}: {}",
                            config.id, e
                        ))
                    })?;
                Ok(DataSourcePool::Postgres(pool))
            }
            DatabaseType::SQLite => {
                let url = if config.connection_url.starts_with("sqlite:") {
                    config.connection_url.clone()
                } else {
                    format!("sqlite:{}", config.connection_url)
                };
                let options = SqliteConnectOptions::from_str(&url)
                    .map_err(|e| {
                        AppError::Configuration(format!(
                            "Invalid SQLite URL for data source {}: {}",
                            config.id, e
                        ))
                    })?
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to connect to SQLite data source {}: {}",
                            config.id, e
                        ))
                    })?;
                Ok(DataSourcePool::Sqlite(pool))
            }
        }
    }

    /// Get the pool registered for a data source
    pub fn pool(&self, id: &DataSourceId) -> Option<&DataSourcePool> {
        self.pools.get(id)
    }

    /// Registered data source ids, sorted
    pub fn source_ids(&self) -> Vec<DataSourceId> {
        let mut ids: Vec<DataSourceId> = self.pools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every pool
    pub async fn close(&self) {
        for pool in self.pools.values() {
            match pool {
                DataSourcePool::Sqlite(p) => p.close().await,
                DataSourcePool::Postgres(p) => p.close().await,
            }
        }
    }
}

#[async_trait]
impl ConnectionSource for PooledDataSources {
    type Connection = PooledConnection;

    async fn acquire(&self, source: &DataSourceId) -> AppResult<PooledConnection> {
        let pool = self.pools.get(source).ok_or_else(|| {
            AppError::Configuration(format!("Unknown data source: {}", source))
        })?;

        let conn = match pool {
            DataSourcePool::Sqlite(p) => PooledConnection::Sqlite(SqliteParticipant::new(
                p.acquire().await.map_err(|e| {
                    AppError::Database(format!("Failed to acquire SQLite connection: {}", e))
                })?,
            )),
            DataSourcePool::Postgres(p) => PooledConnection::Postgres(PostgresParticipant::new(
                p.acquire().await.map_err(|e| {
                    AppError::Database(format!("Failed to acquire PostgreSQL connection: {}", e))
                })?,
            )),
        };
        debug!(source = %source, "Acquired connection");
        Ok(conn)
    }

    async fn release(&self, mut connection: PooledConnection) {
        if connection.in_transaction() {
            if let Err(e) = connection.rollback().await {
                // Drop closes the physical connection in this case
                error!("Rollback on release failed: {}", e);
            }
        }
        drop(connection);
    }
}
