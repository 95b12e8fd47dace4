//! User store built on the unit-of-work coordinator
//!
//! Users and their roles live in one data source, the audit trail in
//! another. Every write opens nested scopes on the caller's unit of work, so
//! a failure anywhere inside `add_user` vetoes the whole operation on both
//! stores.

pub mod schema;

use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::backend::database::PooledConnection;
use crate::backend::{ConnectionSource, DataSourceId};
use crate::config::UserStoreConfig;
use crate::error::{AppError, AppResult};
use crate::transaction::{ExecutionScope, Finalization, UnitOfWork};

/// User store spread over a users source and an audit source
#[derive(Debug, Clone)]
pub struct UserStore {
    users_source: DataSourceId,
    audit_source: DataSourceId,
}

impl UserStore {
    pub fn new(users_source: impl Into<DataSourceId>, audit_source: impl Into<DataSourceId>) -> Self {
        Self {
            users_source: users_source.into(),
            audit_source: audit_source.into(),
        }
    }

    pub fn from_config(config: &UserStoreConfig) -> Self {
        Self::new(config.users_source.as_str(), config.audit_source.as_str())
    }

    pub fn users_source(&self) -> &DataSourceId {
        &self.users_source
    }

    pub fn audit_source(&self) -> &DataSourceId {
        &self.audit_source
    }

    /// Create all tables in one unit of work
    pub async fn init_schema<S>(&self, scope: &mut ExecutionScope<S>) -> AppResult<()>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let result: AppResult<()> = async {
            let mut uow = scope.begin()?;
            let outcome = self.create_tables(&mut uow).await;
            finish(uow, outcome).await
        }
        .await;
        scope.close().await;
        result
    }

    async fn create_tables<S>(&self, uow: &mut UnitOfWork<'_, S>) -> AppResult<()>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let conn = uow.connection(&self.users_source).await?;
        for ddl in schema::user_tables() {
            execute(conn, &ddl, &ddl, &[]).await?;
        }

        let conn = uow.connection(&self.audit_source).await?;
        for ddl in schema::audit_tables(&conn.database_type()) {
            execute(conn, &ddl, &ddl, &[]).await?;
        }
        Ok(())
    }

    /// Insert a user with its roles and an audit entry
    ///
    /// Runs as a nested scope of `uow`; the data only becomes durable when
    /// the outermost scope commits. Returns the new user id.
    pub async fn add_user<S>(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        user_name: &str,
        roles: &[&str],
    ) -> AppResult<String>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        if user_name.trim().is_empty() {
            return Err(AppError::BadRequest("User name cannot be empty".to_string()));
        }

        let mut scope = uow.begin()?;
        let outcome: AppResult<String> = async {
            let id = self.insert_user(&mut scope, user_name).await?;
            self.add_roles(&mut scope, &id, roles).await?;
            self.write_audit(&mut scope, "add_user", user_name).await?;
            Ok(id)
        }
        .await;
        finish(scope, outcome).await
    }

    async fn insert_user<S>(&self, uow: &mut UnitOfWork<'_, S>, user_name: &str) -> AppResult<String>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let mut scope = uow.begin()?;
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();

        let outcome: AppResult<String> = async {
            let conn = scope.connection(&self.users_source).await?;
            execute(
                conn,
                &format!(
                    "INSERT INTO {} (id, user_name, created_at) VALUES (?1, ?2, ?3)",
                    schema::USERS_TABLE
                ),
                &format!(
                    "INSERT INTO {} (id, user_name, created_at) VALUES ($1, $2, $3)",
                    schema::USERS_TABLE
                ),
                &[id.as_str(), user_name, created_at.as_str()],
            )
            .await
            .map_err(|e| map_duplicate(e, "User already exists"))?;
            debug!(user = user_name, "Inserted user");
            Ok(id.clone())
        }
        .await;
        finish(scope, outcome).await
    }

    async fn add_roles<S>(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        user_id: &str,
        roles: &[&str],
    ) -> AppResult<()>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let mut scope = uow.begin()?;
        let outcome: AppResult<()> = async {
            let conn = scope.connection(&self.users_source).await?;
            for role in roles {
                execute(
                    conn,
                    &format!(
                        "INSERT INTO {} (user_id, role_name) VALUES (?1, ?2)",
                        schema::USER_ROLES_TABLE
                    ),
                    &format!(
                        "INSERT INTO {} (user_id, role_name) VALUES ($1, $2)",
                        schema::USER_ROLES_TABLE
                    ),
                    &[user_id, *role],
                )
                .await
                .map_err(|e| map_duplicate(e, "Role already assigned"))?;
            }
            Ok(())
        }
        .await;
        finish(scope, outcome).await
    }

    async fn write_audit<S>(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        action: &str,
        subject: &str,
    ) -> AppResult<()>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let created_at = Utc::now().to_rfc3339();
        let conn = uow.connection(&self.audit_source).await?;
        execute(
            conn,
            &format!(
                "INSERT INTO {} (action, subject, created_at) VALUES (?1, ?2, ?3)",
                schema::AUDIT_TABLE
            ),
            &format!(
                "INSERT INTO {} (action, subject, created_at) VALUES ($1, $2, $3)",
                schema::AUDIT_TABLE
            ),
            &[action, subject, created_at.as_str()],
        )
        .await?;
        Ok(())
    }

    /// Number of stored users
    pub async fn count_users<S>(&self, uow: &mut UnitOfWork<'_, S>) -> AppResult<i64>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let sql = format!("SELECT COUNT(*) FROM {}", schema::USERS_TABLE);
        let conn = uow.connection_with_mode(&self.users_source, false).await?;
        fetch_count(conn, &sql).await
    }

    /// Number of audit entries
    pub async fn count_audit_entries<S>(&self, uow: &mut UnitOfWork<'_, S>) -> AppResult<i64>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let sql = format!("SELECT COUNT(*) FROM {}", schema::AUDIT_TABLE);
        let conn = uow.connection_with_mode(&self.audit_source, false).await?;
        fetch_count(conn, &sql).await
    }

    /// Roles assigned to a user, sorted by name
    pub async fn roles_of<S>(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        user_name: &str,
    ) -> AppResult<Vec<String>>
    where
        S: ConnectionSource<Connection = PooledConnection> + Clone,
    {
        let conn = uow.connection_with_mode(&self.users_source, false).await?;
        let select = |placeholder: &str| {
            format!(
                "SELECT r.role_name FROM {} r JOIN {} u ON u.id = r.user_id WHERE u.user_name = {} ORDER BY r.role_name",
                schema::USER_ROLES_TABLE,
                schema::USERS_TABLE,
                placeholder
            )
        };

        let roles = match conn {
            PooledConnection::Sqlite(p) => {
                sqlx::query_scalar(&select("?1"))
                    .bind(user_name)
                    .fetch_all(p.connection())
                    .await?
            }
            PooledConnection::Postgres(p) => {
                sqlx::query_scalar(&select("$1"))
                    .bind(user_name)
                    .fetch_all(p.connection())
                    .await?
            }
        };
        Ok(roles)
    }
}

/// Commit the scope on success, roll it back on failure
///
/// If the rollback fails too, both errors come back together as
/// [`AppError::RollbackAfterFailure`].
pub async fn finish<S, T>(uow: UnitOfWork<'_, S>, outcome: AppResult<T>) -> AppResult<T>
where
    S: ConnectionSource + Clone,
{
    match outcome {
        Ok(value) => {
            match uow.commit().await? {
                Finalization::RolledBack => Err(AppError::Internal(
                    "Unit of work was rolled back by a nested scope".to_string(),
                )),
                Finalization::Deferred | Finalization::Committed => Ok(value),
            }
        }
        Err(e) => {
            match uow.rollback().await {
                Ok(_) => Err(e),
                Err(rollback_error) => {
                    error!("Rollback after failure also failed: {}", rollback_error);
                    Err(AppError::RollbackAfterFailure {
                        cause: Box::new(e),
                        rollback: Box::new(rollback_error),
                    })
                }
            }
        }
    }
}

async fn execute(
    conn: &mut PooledConnection,
    sqlite_sql: &str,
    postgres_sql: &str,
    args: &[&str],
) -> AppResult<u64> {
    let result = match conn {
        PooledConnection::Sqlite(p) => {
            let mut query = sqlx::query(sqlite_sql);
            for arg in args {
                query = query.bind(*arg);
            }
            query.execute(p.connection()).await?.rows_affected()
        }
        PooledConnection::Postgres(p) => {
            let mut query = sqlx::query(postgres_sql);
            for arg in args {
                query = query.bind(*arg);
            }
            query.execute(p.connection()).await?.rows_affected()
        }
    };
    Ok(result)
}

async fn fetch_count(conn: &mut PooledConnection, sql: &str) -> AppResult<i64> {
    let count = match conn {
        PooledConnection::Sqlite(p) => sqlx::query_scalar(sql).fetch_one(p.connection()).await?,
        PooledConnection::Postgres(p) => sqlx::query_scalar(sql).fetch_one(p.connection()).await?,
    };
    Ok(count)
}

fn map_duplicate(error: AppError, message: &str) -> AppError {
    let duplicate = matches!(
        &error,
        AppError::Database(text) if text.contains("duplicate key") || text.contains("UNIQUE constraint")
    );
    if duplicate {
        AppError::BadRequest(message.to_string())
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_duplicate() {
        let err = map_duplicate(
            AppError::Database("UNIQUE constraint failed: um_user.user_name".to_string()),
            "User already exists",
        );
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "User already exists"));

        let err = map_duplicate(AppError::Database("disk I/O error".to_string()), "x");
        assert!(matches!(err, AppError::Database(_)));
    }
}
