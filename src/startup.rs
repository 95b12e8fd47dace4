use std::sync::Arc;
use tracing::info;

use crate::backend::database::PooledDataSources;
use crate::backend::BackendFactory;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::store::UserStore;
use crate::transaction::ExecutionScope;

/// Connect a pool for every configured data source
pub async fn connect_data_sources(config: &AppConfig) -> AppResult<Arc<PooledDataSources>> {
    config.validate().map_err(AppError::Configuration)?;
    let source_configs = config
        .data_source_configs()
        .map_err(AppError::Configuration)?;

    BackendFactory::create(&source_configs).await
}

/// Create the user-store tables on their data sources
pub async fn initialize_user_store(
    config: &AppConfig,
    sources: Arc<PooledDataSources>,
) -> AppResult<UserStore> {
    let store = UserStore::from_config(&config.user_store);
    let mut scope = ExecutionScope::new(sources);
    store.init_schema(&mut scope).await?;
    info!(
        users = %store.users_source(),
        audit = %store.audit_source(),
        "Initialized user store schema"
    );
    Ok(store)
}
