use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod database;

/// Supported database backend types
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Parse the `type` value used in configuration files
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "postgresql" | "postgres" => Some(DatabaseType::PostgreSQL),
            "sqlite" => Some(DatabaseType::SQLite),
            _ => None,
        }
    }
}

/// Identifies one pooled backing store.
///
/// Cheap to clone and compared by value, so it can key the participant list
/// of a transaction context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSourceId(Arc<str>);

impl DataSourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataSourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DataSourceId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// A live connection that can take part in a unit of work
///
/// A connection starts in whatever auto-commit mode its source hands it out
/// in. Switching off auto-commit opens an explicit transaction that stays
/// open until `commit` or `rollback`.
#[async_trait]
pub trait ParticipantConnection: Send {
    /// Whether statements on this connection commit on their own
    fn is_auto_commit(&self) -> bool;

    /// Switch auto-commit mode. Turning it off begins an explicit transaction.
    async fn set_auto_commit(&mut self, auto_commit: bool) -> AppResult<()>;

    /// Commit the explicit transaction, if one is open
    async fn commit(&mut self) -> AppResult<()>;

    /// Roll back the explicit transaction, if one is open
    async fn rollback(&mut self) -> AppResult<()>;
}

/// Pooled provider of participant connections, keyed by data source
///
/// Implementations must tolerate concurrent `acquire`/`release` from many
/// transaction contexts at once.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Connection: ParticipantConnection;

    /// Fetch a connection for the given data source
    async fn acquire(&self, source: &DataSourceId) -> AppResult<Self::Connection>;

    /// Return a connection to its pool
    ///
    /// Takes ownership, so a connection can only ever be released once.
    /// Never fails; problems are logged by the implementation.
    async fn release(&self, connection: Self::Connection);
}

#[async_trait]
impl<S: ConnectionSource + ?Sized> ConnectionSource for Arc<S> {
    type Connection = S::Connection;

    async fn acquire(&self, source: &DataSourceId) -> AppResult<Self::Connection> {
        (**self).acquire(source).await
    }

    async fn release(&self, connection: Self::Connection) {
        (**self).release(connection).await
    }
}

/// Factory for creating pooled data sources
pub struct BackendFactory;

impl BackendFactory {
    /// Connect every configured data source and wrap them in one connection source
    pub async fn create(
        configs: &[crate::backend::database::DataSourceConfig],
    ) -> AppResult<Arc<database::PooledDataSources>> {
        let sources = database::PooledDataSources::connect_all(configs).await?;
        Ok(Arc::new(sources))
    }
}
