use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::backend::database::DataSourceConfig;
use crate::backend::DatabaseType;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub data_sources: Vec<DataSourceEntry>,
    pub user_store: UserStoreConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DataSourceEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    30
}

/// Which data sources back the user store
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserStoreConfig {
    pub users_source: String,
    pub audit_source: String,
}

impl DataSourceEntry {
    /// Convert to the connection settings used by the pool factory
    pub fn to_data_source_config(&self) -> Result<DataSourceConfig, String> {
        let database_type = DatabaseType::from_config_name(&self.db_type).ok_or_else(|| {
            format!(
                "Unsupported database type for data source {}: {}",
                self.id, self.db_type
            )
        })?;

        let config = DataSourceConfig::new(self.id.as_str(), database_type, self.url.clone())
            .with_max_connections(self.max_connections)
            .with_connection_timeout(self.connection_timeout);
        config.validate()?;
        Ok(config)
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, String> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(format!("Configuration file not found: {}", path.display()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        Self::from_yaml(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
    }

    /// Parse YAML content, expanding environment variables first
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        let expanded_content = Self::expand_env_vars(content)?;

        let app_config: AppConfig =
            serde_yaml::from_str(&expanded_content).map_err(|e| e.to_string())?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Two in-memory SQLite data sources, for development and tests
    pub fn default_config() -> Self {
        AppConfig {
            logging: LoggingConfig::default(),
            data_sources: vec![
                DataSourceEntry {
                    id: "users".to_string(),
                    db_type: "sqlite".to_string(),
                    url: "sqlite::memory:".to_string(),
                    max_connections: 1,
                    connection_timeout: default_connection_timeout(),
                },
                DataSourceEntry {
                    id: "audit".to_string(),
                    db_type: "sqlite".to_string(),
                    url: "sqlite::memory:".to_string(),
                    max_connections: 1,
                    connection_timeout: default_connection_timeout(),
                },
            ],
            user_store: UserStoreConfig {
                users_source: "users".to_string(),
                audit_source: "audit".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.data_sources.is_empty() {
            return Err("Configuration must contain at least one data source".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &self.data_sources {
            if !seen.insert(entry.id.as_str()) {
                return Err(format!("Duplicate data source id: {}", entry.id));
            }
            entry.to_data_source_config()?;
        }

        for (role, id) in [
            ("users_source", &self.user_store.users_source),
            ("audit_source", &self.user_store.audit_source),
        ] {
            if !seen.contains(id.as_str()) {
                return Err(format!(
                    "user_store.{} refers to unknown data source: {}",
                    role, id
                ));
            }
        }

        Ok(())
    }

    /// Connection settings for every configured data source
    pub fn data_source_configs(&self) -> Result<Vec<DataSourceConfig>, String> {
        self.data_sources
            .iter()
            .map(|entry| entry.to_data_source_config())
            .collect()
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let chars: Vec<char> = content.chars().collect();
        let mut expanded = String::new();
        let mut i = 0;

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
                // Find the closing brace
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }

                if j < chars.len() {
                    let var_expr: String = chars[i + 2..j].iter().collect();

                    let (var_name, default_value) = if let Some(pos) = var_expr.find(":-") {
                        (
                            var_expr[..pos].to_string(),
                            Some(var_expr[pos + 2..].to_string()),
                        )
                    } else {
                        (var_expr, None)
                    };

                    let value = match std::env::var(&var_name) {
                        Ok(val) => val,
                        Err(_) => {
                            if let Some(default) = default_value {
                                default
                            } else {
                                return Err(format!(
                                    "Environment variable {} not found and no default provided",
                                    var_name
                                ));
                            }
                        }
                    };

                    expanded.push_str(&value);
                    i = j + 1;
                } else {
                    expanded.push(chars[i]);
                    i += 1;
                }
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        Ok(expanded)
    }
}
