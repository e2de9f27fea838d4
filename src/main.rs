// Main entry point for testpulse

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use testpulse::cli::{Cli, Commands};
use testpulse::commands;
use testpulse::config::ReporterConfig;
use testpulse::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose);

    if cli.verbose {
        info!("Starting testpulse v{}", env!("CARGO_PKG_VERSION"));
    }

    if cli.show_config {
        return commands::handle_show_config(cli.config_file.as_deref());
    }

    if let Some(path) = &cli.init_config {
        return commands::handle_init_config(path);
    }

    if let Some(shell_type) = &cli.completion {
        return commands::handle_completion(shell_type);
    }

    match &cli.command {
        Some(Commands::Ingest(args)) => {
            let config = ReporterConfig::load(cli.config_file.as_deref())?;
            let run = commands::handle_ingest(args, &config).await?;
            if run.is_failed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::FetchResult(args)) => commands::handle_fetch_result(args).await,
        Some(Commands::RunStatus(args)) => commands::handle_run_status(args).await,
        None => {
            warn!("No command given. Use 'testpulse --help' for usage.");
            Ok(())
        }
    }
}
