// CLI argument definitions using Clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::normalizer::Framework;

/// Test result aggregation and live run reporting
#[derive(Parser, Debug)]
#[command(name = "testpulse")]
#[command(author = "testpulse team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build a result tree from native test framework events", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose debug output
    #[arg(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Configuration file (default: .testpulserc.toml in the cwd or home directory)
    #[arg(long, global = true, value_name = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Show the effective configuration and exit
    #[arg(long, default_value_t = false)]
    pub show_config: bool,

    /// Create default configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    pub init_config: Option<PathBuf>,

    /// Print shell completion (bash, zsh, fish, powershell)
    #[arg(long, value_name = "SHELL_TYPE", value_parser = ["bash", "zsh", "fish", "powershell"])]
    pub completion: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reduce a stream of native framework events into a result tree
    Ingest(IngestArgs),

    /// Wait for the collector to publish the result of a run
    FetchResult(FetchResultArgs),

    /// Print the live status of a run
    RunStatus(RunStatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Framework that produced the events
    #[arg(value_enum)]
    pub framework: Framework,

    /// NDJSON event file (default: stdin)
    pub input: Option<PathBuf>,

    /// Directory of the result file (overrides CB_OUTPUT_DIR)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Also write a JUnit XML report
    #[arg(long, value_name = "FILE")]
    pub junit: Option<PathBuf>,

    /// Stream status updates as NDJSON on stdout
    #[arg(long, default_value_t = false)]
    pub stream: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchResultArgs {
    /// Run identifier
    pub run_id: String,

    /// API key (default: CB_API_KEY)
    #[arg(long, env = "CB_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// API base URL
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Also print the tags of each case
    #[arg(long, default_value_t = false)]
    pub tags: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunStatusArgs {
    /// Run identifier
    pub run_id: String,

    /// API key (default: CB_API_KEY)
    #[arg(long, env = "CB_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// API base URL
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl RunStatusArgs {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::parse_from([
            "testpulse",
            "ingest",
            "playwright",
            "events.ndjson",
            "--junit",
            "out/junit.xml",
            "--stream",
        ]);
        let Some(Commands::Ingest(args)) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.framework, Framework::Playwright);
        assert_eq!(args.input, Some(PathBuf::from("events.ndjson")));
        assert_eq!(args.junit, Some(PathBuf::from("out/junit.xml")));
        assert!(args.stream);
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from(["testpulse", "-v", "--show-config"]);
        assert!(cli.verbose);
        assert!(cli.show_config);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_status_format() {
        let cli = Cli::parse_from([
            "testpulse", "run-status", "run-1", "--api-key", "k", "--format", "json",
        ]);
        let Some(Commands::RunStatus(args)) = cli.command else {
            panic!("expected run-status");
        };
        assert!(args.is_json());
    }
}
