//! Subcommand handlers.

use serde_json::{Value, json};
use shopsync_core::config::{SyncConfig, WarehouseBackend, load_config};
use shopsync_core::{PipelineError, PipelineOutput, run_pipeline};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline and print the synced sample
    Run {
        #[command(flatten)]
        args: SyncArgs,
    },
    /// Run the pipeline and print only the analysis context
    Context {
        /// Rows per entity type
        #[arg(short = 'n', long)]
        rows: Option<usize>,

        #[command(flatten)]
        args: SyncArgs,
    },
    /// Show the resolved configuration with secrets redacted
    Config {
        #[command(flatten)]
        args: SyncArgs,
    },
}

/// Flags that override configuration for one invocation.
#[derive(clap::Args, Debug, Default)]
pub struct SyncArgs {
    /// Shop name (the `{shop}` in `{shop}.myshopify.com`)
    #[arg(long)]
    shop: Option<String>,

    /// Shopify Admin API access token
    #[arg(long)]
    token: Option<String>,

    /// Warehouse project id
    #[arg(long)]
    project: Option<String>,

    /// Warehouse dataset id
    #[arg(long)]
    dataset: Option<String>,

    /// Service-account JSON key file
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Warehouse backend: bigquery or sqlite
    #[arg(long)]
    backend: Option<String>,

    /// Directory for SQLite dataset files
    #[arg(long)]
    sqlite_path: Option<PathBuf>,

    /// Sync customers and products concurrently
    #[arg(long)]
    concurrent: bool,
}

pub async fn handle_command(command: Commands, config_file: Option<&Path>) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run { args } => {
            let config = resolve_config(config_file, &args)?;
            let result = run_pipeline(&config).await;
            let envelope = match &result {
                Ok(output) => success_envelope(output),
                Err(err) => {
                    log_failure(err);
                    failure_envelope(err)
                }
            };
            print_json(&envelope)?;
            Ok(exit_code(result.is_ok()))
        }
        Commands::Context { rows, args } => {
            let config = resolve_config(config_file, &args)?;
            let rows = rows.unwrap_or(config.pipeline.analysis_sample);
            match run_pipeline(&config).await {
                Ok(output) => {
                    print_json(&output.analysis_context(rows))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    log_failure(&err);
                    print_json(&failure_envelope(&err))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Config { args } => {
            let config = resolve_config(config_file, &args)?;
            print_json(&serde_json::to_value(config.redacted())?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_config(config_file: Option<&Path>, args: &SyncArgs) -> anyhow::Result<SyncConfig> {
    let mut config = load_config(config_file, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&mut config, args)?;
    Ok(config)
}

/// Apply CLI flags on top of the loaded configuration.
pub fn apply_overrides(config: &mut SyncConfig, args: &SyncArgs) -> anyhow::Result<()> {
    if let Some(shop) = &args.shop {
        config.shop.shop_name = shop.clone();
    }
    if let Some(token) = &args.token {
        config.shop.access_token = token.clone();
    }
    if let Some(project) = &args.project {
        config.warehouse.project_id = project.clone();
    }
    if let Some(dataset) = &args.dataset {
        config.warehouse.dataset_id = dataset.clone();
    }
    if let Some(credentials) = &args.credentials {
        config.warehouse.credentials_path = Some(credentials.clone());
    }
    if let Some(backend) = &args.backend {
        config.warehouse.backend = match backend.to_ascii_lowercase().as_str() {
            "bigquery" => WarehouseBackend::Bigquery,
            "sqlite" => WarehouseBackend::Sqlite,
            other => anyhow::bail!("Unknown backend: '{}'. Use 'bigquery' or 'sqlite'.", other),
        };
    }
    if let Some(path) = &args.sqlite_path {
        config.warehouse.sqlite_path = Some(path.clone());
    }
    if args.concurrent {
        config.pipeline.concurrent_entities = true;
    }
    Ok(())
}

pub fn success_envelope(output: &PipelineOutput) -> Value {
    json!({
        "success": true,
        "message": "Pipeline executed successfully",
        "customers": output.customers,
        "products": output.products,
        "report": output.report,
    })
}

pub fn failure_envelope(err: &PipelineError) -> Value {
    json!({
        "success": false,
        "kind": err.kind(),
        "step": err.step.to_string(),
        "entity": err.entity,
        "message": format!("Pipeline failed: {err}"),
    })
}

fn log_failure(err: &PipelineError) {
    tracing::error!(
        kind = %err.kind(),
        step = %err.step,
        entity = ?err.entity,
        error = %err,
        "Pipeline failed"
    );
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
