use crate::backend::DatabaseType;

pub const USERS_TABLE: &str = "um_user";
pub const USER_ROLES_TABLE: &str = "um_user_role";
pub const AUDIT_TABLE: &str = "um_audit";

/// DDL for the users data source
pub fn user_tables() -> Vec<String> {
    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                user_name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )
            "#,
            USERS_TABLE
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                user_id TEXT NOT NULL,
                role_name TEXT NOT NULL,
                UNIQUE(user_id, role_name)
            )
            "#,
            USER_ROLES_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_user_id ON {} (user_id)",
            USER_ROLES_TABLE, USER_ROLES_TABLE
        ),
    ]
}

/// DDL for the audit data source
pub fn audit_tables(database_type: &DatabaseType) -> Vec<String> {
    let id_column = match database_type {
        DatabaseType::SQLite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        DatabaseType::PostgreSQL => "id BIGSERIAL PRIMARY KEY",
    };
    vec![format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            {},
            action TEXT NOT NULL,
            subject TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        AUDIT_TABLE, id_column
    )]
}
