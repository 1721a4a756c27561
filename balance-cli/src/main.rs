mod balance;
mod cli;
mod config;
mod ingest;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;
    log::debug!("Database: {}", config.db_path().display());

    cli::run(cli.command, config).await
}
