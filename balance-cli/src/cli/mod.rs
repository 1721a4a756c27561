//! Command-line interface

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::SqlitePool;

use crate::balance::BalanceOverview;
use crate::config::Config;
use crate::config::repository::{self, sources, sources::Source};
use crate::ingest::{Coordinator, CoordinatorSettings, IngestError};

#[derive(Parser, Debug)]
#[command(name = "balance-cli", version, about = "Energy balance workbook ingestion")]
pub struct Cli {
    /// Config file (defaults to <config dir>/balance-cli/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a workbook and publish its snapshot
    Ingest(IngestArgs),
    /// Parse a workbook without storing anything and report per-year coverage
    Verify(VerifyArgs),
    /// List years with data for a source
    Years(SourceArgs),
    /// Show energy or sales points
    Show(ShowArgs),
    /// Show ingestion run history
    Runs(RunsArgs),
    /// Export the current snapshot to an .xlsx file
    Export(ExportArgs),
    /// Watch a directory and ingest dropped workbooks
    Watch(WatchArgs),
    /// List registered sources
    Sources,
    /// Manage label -> category overrides
    #[command(subcommand)]
    Mapping(MappingCommands),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Source id (defaults to the configured source)
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Workbook to ingest (.xlsx, .xlsm, .xls, .ods)
    pub file: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Dataset id for a newly registered source
    #[arg(long)]
    pub dataset: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub file: PathBuf,

    /// First expected year
    #[arg(long, default_value_t = 2016)]
    pub from: i32,

    /// Last expected year
    #[arg(long, default_value_t = 2025)]
    pub to: i32,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Only this year
    #[arg(long)]
    pub year: Option<i32>,

    /// Show the currency (sales) table instead of energy
    #[arg(long)]
    pub sales: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Only runs of this source
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output .xlsx path
    pub output: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch (defaults to the configured data dir)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Subcommand, Debug)]
pub enum MappingCommands {
    /// List label overrides
    List,
    /// Map a row label to a category (REGULADOS, LIBRES, COES_SPOT, PERDIDAS, SERVICIOS_AUX)
    Set { label: String, category: String },
    /// Remove a label override
    Delete { label: String },
}

/// Dispatch a parsed command
pub async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Ingest(args) => commands::ingest::handle_ingest_command(args, &config).await,
        Commands::Verify(args) => commands::verify::handle_verify_command(args, &config).await,
        Commands::Years(args) => commands::show::handle_years_command(args, &config).await,
        Commands::Show(args) => commands::show::handle_show_command(args, &config).await,
        Commands::Runs(args) => commands::runs::handle_runs_command(args, &config).await,
        Commands::Export(args) => commands::export::handle_export_command(args, &config).await,
        Commands::Watch(args) => commands::watch::handle_watch_command(args, &config).await,
        Commands::Sources => commands::runs::handle_sources_command(&config).await,
        Commands::Mapping(cmd) => commands::mapping::handle_mapping_command(cmd, &config).await,
    }
}

pub(crate) async fn open_pool(config: &Config) -> Result<SqlitePool> {
    repository::connect(&config.db_path()).await
}

/// Stored source, or a new one from configuration defaults
pub(crate) async fn resolve_source(
    pool: &SqlitePool,
    config: &Config,
    args: &SourceArgs,
    dataset: Option<&str>,
) -> Result<Source> {
    let source_id = args.source.as_deref().unwrap_or(&config.source.source_id);
    let stored = sources::get_source(pool, source_id)
        .await
        .with_context(|| format!("Failed to look up source '{}'", source_id))?;

    Ok(match stored {
        Some(mut source) => {
            if let Some(dataset) = dataset {
                source.dataset_id = dataset.to_string();
            }
            source
        }
        None => Source::new(source_id, dataset.unwrap_or(&config.source.dataset_id)),
    })
}

/// Registered source for read-only commands
pub(crate) async fn stored_source(pool: &SqlitePool, config: &Config, args: &SourceArgs) -> Result<Source> {
    let source_id = args.source.as_deref().unwrap_or(&config.source.source_id);
    sources::get_source(pool, source_id)
        .await?
        .ok_or_else(|| {
            IngestError::UnknownSource {
                source_id: source_id.to_string(),
            }
            .into()
        })
}

pub(crate) fn coordinator(pool: SqlitePool, config: &Config) -> Coordinator {
    Coordinator::new(pool, CoordinatorSettings::from(config))
}

/// Rebuild the published snapshot of a registered source from storage
pub(crate) async fn restored_overview(
    config: &Config,
    args: &SourceArgs,
) -> Result<(Source, Option<Arc<BalanceOverview>>)> {
    let pool = open_pool(config).await?;
    let source = stored_source(&pool, config, args).await?;
    let overview = coordinator(pool, config).restore(&source).await?;
    Ok((source, overview))
}
