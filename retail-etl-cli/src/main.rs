//! Command-line runner for the retail ETL pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use retail_etl::cancellation::CancellationToken;
use retail_etl::config::EtlConfig;
use retail_etl::errors::EtlError;
use retail_etl::observability::init_tracing;
use retail_etl::pipeline::{Collaborators, Orchestrator, PipelineBuilder};
use retail_etl::warehouse::{schema, WarehouseClient};

#[derive(Debug, Parser)]
#[command(name = "retail-etl", version, about = "Retail CSV to star schema batch pipeline")]
struct Cli {
    /// TOML configuration file. Environment variables prefixed with
    /// `RETAIL_ETL_` override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline once and print the run report (the default).
    Run,
    /// Print the effective configuration with secrets redacted.
    ShowConfig,
    /// Print the SQL each stage would execute.
    RenderSql,
    /// Create the staging and star schema tables.
    InitSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EtlConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::ShowConfig => show_config(&config),
        Command::RenderSql => render_sql(&config),
        Command::InitSchema => init_schema(&config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &EtlConfig) -> Result<ExitCode> {
    let collaborators = Collaborators::from_config(config)?;
    let orchestrator = Orchestrator::from_config(config, &collaborators)?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel("interrupted");
        }
    });

    match orchestrator.run_with(token).await {
        Ok(report) => {
            println!("{}", report.to_json());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            if let Some(stage) = e.failed_stage() {
                eprintln!("Failing stage: {stage}");
            }
            if let Some(report) = e.report() {
                println!("{}", report.to_json());
            }
            Ok(match e {
                EtlError::Cancelled { .. } => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            })
        }
    }
}

fn show_config(config: &EtlConfig) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(&config.redacted())
        .context("serializing configuration")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

fn render_sql(config: &EtlConfig) -> Result<ExitCode> {
    let collaborators = Collaborators::from_config(config)?;
    let pipeline = PipelineBuilder::retail(config, &collaborators).build()?;
    for stage in pipeline.stages() {
        let statements = stage.statements();
        if statements.is_empty() {
            continue;
        }
        println!("-- {}", stage.name());
        for statement in statements {
            println!("{}\n", statement.to_sql());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn init_schema(config: &EtlConfig) -> Result<ExitCode> {
    config.validate()?;
    let collaborators = Collaborators::from_config(config)?;
    let client = WarehouseClient::new(collaborators.warehouse);
    let statements = schema::bootstrap();
    client
        .run_transaction(&statements)
        .await
        .context("creating warehouse tables")?;
    info!(tables = statements.len(), "Schema initialized");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_runs() {
        let cli = Cli::try_parse_from(["retail-etl"]).unwrap();
        assert!(matches!(cli.command.unwrap_or(Command::Run), Command::Run));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_config_flag_without_subcommand() {
        let cli = Cli::try_parse_from(["retail-etl", "--config", "etl.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Some(PathBuf::from("etl.toml")));
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["retail-etl", "render-sql"]).unwrap();
        assert!(matches!(cli.command, Some(Command::RenderSql)));
        let cli = Cli::try_parse_from(["retail-etl", "show-config", "-c", "x.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::ShowConfig)));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
