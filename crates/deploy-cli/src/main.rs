//! Deploy agent CLI
//!
//! One positional argument: the path to a deployment configuration file.
//! The configuration itself decides everything else about the run.

mod error;

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use deploy_core::{DeployConfig, Orchestrator, RunSummary};

use error::{CliError, Result};

/// Synchronize a project tree and provision its databases from one
/// declarative configuration.
#[derive(Debug, Parser)]
#[command(name = "deploy", version, about)]
struct Cli {
    /// Path to the agent configuration JSON file
    config: PathBuf,

    /// Type of agent to run
    #[arg(long, default_value = "ai-deploy")]
    agent_type: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.agent_type != "ai-deploy" {
        return Err(CliError::user(format!(
            "Unknown agent type: {}",
            cli.agent_type
        )));
    }
    if !cli.config.exists() {
        return Err(CliError::user(format!(
            "Configuration file not found: {}",
            cli.config.display()
        )));
    }

    let config = DeployConfig::load(&cli.config).map_err(CliError::Core)?;

    // Log level follows the configuration's verbose flag
    let level = if config.options.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if let Some(description) = &config.description {
        println!("{} {}", "=>".blue().bold(), description);
    }

    let orchestrator = Orchestrator::new(config, &cli.config);
    let summary = orchestrator.run().map_err(CliError::Core)?;
    print_summary(&summary);

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let heading = if summary.dry_run {
        "Dry run complete"
    } else {
        "Deployment complete"
    };
    println!("{} {}:", "OK".green().bold(), heading);
    println!("   {} {} new file(s)", "+".green(), summary.creates);
    println!("   {} {} updated file(s)", "~".yellow(), summary.updates);
    println!("   {} {} deleted file(s)", "-".red(), summary.deletes);
    if summary.mappings_copied > 0 {
        println!("   {} {} file mapping(s)", "+".green(), summary.mappings_copied);
    }
    if summary.scripts_executed > 0 {
        println!(
            "   {} {} SQL script(s) executed",
            "+".green(),
            summary.scripts_executed
        );
    }
    if summary.records_seeded > 0 {
        println!(
            "   {} {} record(s) seeded",
            "+".green(),
            summary.records_seeded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_config_argument() {
        let cli = Cli::parse_from(["deploy", "staging.json"]);
        assert_eq!(cli.config, PathBuf::from("staging.json"));
        assert_eq!(cli.agent_type, "ai-deploy");
    }

    #[test]
    fn test_cli_agent_type_flag() {
        let cli = Cli::parse_from(["deploy", "c.json", "--agent-type", "other"]);
        assert_eq!(cli.agent_type, "other");
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_error_user() {
        let error = CliError::user("test error");
        assert_eq!(format!("{}", error), "test error");
    }
}
