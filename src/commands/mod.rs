// Commands module - handles CLI command execution

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::{FileConfig, ReporterConfig};

pub mod fetch;
pub mod ingest;
pub mod status;

pub use fetch::handle_fetch_result;
pub use ingest::handle_ingest;
pub use status::handle_run_status;

/// Handle shell completion
pub fn handle_completion(shell_type: &str) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::{Shell, generate};

    let shell = match shell_type.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" => Shell::PowerShell,
        _ => {
            anyhow::bail!(
                "Unsupported shell: {}. Supported: bash, zsh, fish, powershell",
                shell_type
            );
        }
    };

    let mut cmd = crate::cli::Cli::command();
    let name = cmd.get_name().to_string();
    let mut stdout = std::io::stdout();

    generate(shell, &mut cmd, name, &mut stdout);

    Ok(())
}

/// Print the effective configuration, token masked
pub fn handle_show_config(config_file: Option<&Path>) -> Result<()> {
    let config = ReporterConfig::load(config_file)?;
    let rendered = serde_json::to_string_pretty(&config.redacted())
        .context("Failed to render configuration")?;

    println!("Effective configuration:");
    println!("{}", rendered);
    println!("\nConfiguration precedence:");
    println!("  1. Environment variables (highest)");
    println!("  2. Configuration file");
    println!("  3. Built-in defaults (lowest)");
    Ok(())
}

/// Write a default configuration file
pub fn handle_init_config(path: &Path) -> Result<()> {
    let content = FileConfig::default().to_toml();
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Configuration file created: {}", path.display());
    println!("\nYou can now edit the file to customize your settings.");
    Ok(())
}

/// Truncate string to max length with ellipsis
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
