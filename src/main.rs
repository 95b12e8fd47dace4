use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use userstore_uow::backend::database::PooledDataSources;
use userstore_uow::config::AppConfig;
use userstore_uow::error::AppResult;
use userstore_uow::transaction::{ExecutionScope, Finalization};
use userstore_uow::{logging, startup, DataSourceId};

#[derive(Parser, Debug)]
#[command(name = "userstore-uow")]
#[command(about = "Unit-of-work coordinator for multi-database user stores")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the user-store tables
    Init,
    /// Open one unit of work across every data source and commit it
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct SourceReport {
    source: String,
    database_type: Option<String>,
    acquired: bool,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    sources: Vec<SourceReport>,
    committed: bool,
    error: Option<String>,
}

async fn run_check(sources: Arc<PooledDataSources>) -> CheckReport {
    let ids = sources.source_ids();
    let types: HashMap<DataSourceId, String> = ids
        .iter()
        .filter_map(|id| {
            sources
                .pool(id)
                .map(|pool| (id.clone(), format!("{:?}", pool.database_type())))
        })
        .collect();
    let mut scope = ExecutionScope::new(sources);
    let mut reports = Vec::new();

    let outcome: AppResult<Finalization> = async {
        let mut uow = scope.begin()?;
        for id in &ids {
            let database_type = types.get(id).cloned();
            let report = match uow.connection(id).await {
                Ok(_) => SourceReport {
                    source: id.to_string(),
                    database_type,
                    acquired: true,
                    error: None,
                },
                Err(e) => SourceReport {
                    source: id.to_string(),
                    database_type,
                    acquired: false,
                    error: Some(e.to_string()),
                },
            };
            reports.push(report);
        }
        if reports.iter().all(|r| r.acquired) {
            uow.commit().await
        } else {
            uow.rollback().await
        }
    }
    .await;
    scope.close().await;

    match outcome {
        Ok(finalization) => CheckReport {
            sources: reports,
            committed: finalization == Finalization::Committed,
            error: None,
        },
        Err(e) => CheckReport {
            sources: reports,
            committed: false,
            error: Some(e.to_string()),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let app_config = if args.config == "config.yaml" && !std::path::Path::new("config.yaml").exists() {
        println!("⚠️  No config.yaml found, using default configuration:");
        println!("   - Two in-memory SQLite data sources (users, audit)");
        AppConfig::default_config()
    } else {
        AppConfig::load_from_file(&args.config)
            .map_err(|e| format!("Failed to load configuration: {}", e))?
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| app_config.logging.level.clone());
    logging::init_tracing(&level)?;

    info!(
        data_sources = app_config.data_sources.len(),
        "Configuration loaded"
    );

    let sources = startup::connect_data_sources(&app_config).await?;

    let result = match args.command {
        Command::Init => {
            let store = startup::initialize_user_store(&app_config, sources.clone()).await?;
            println!(
                "✅ User store initialized (users: {}, audit: {})",
                store.users_source(),
                store.audit_source()
            );
            Ok(())
        }
        Command::Check { json } => {
            let report = run_check(sources.clone()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for source in &report.sources {
                    match &source.error {
                        None => println!(
                            "✅ {} ({})",
                            source.source,
                            source.database_type.as_deref().unwrap_or("unknown")
                        ),
                        Some(e) => println!("❌ {}: {}", source.source, e),
                    }
                }
            }
            match report.error {
                Some(e) => Err(e),
                None if !report.committed => Err("Unit of work was rolled back".to_string()),
                None => Ok(()),
            }
        }
    };

    sources.close().await;

    if let Err(e) = result {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
