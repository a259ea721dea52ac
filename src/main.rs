// src/main.rs
//! CloudFlock - CLI Entry Point

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "cloudflock")]
#[command(author = "CloudFlock Project")]
#[command(version)]
#[command(about = "Migrate a running Unix host onto a replacement host", long_about = None)]
struct Cli {
    /// Stream remote PTY buffers to stdout
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile a host and report a destination recommendation
    Profile {
        /// Path to the JSON host configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Emit the profile as JSON
        #[arg(long)]
        json: bool,

        /// Resolve against the legacy (first-generation) catalog
        #[arg(long)]
        legacy: bool,
    },

    /// Migrate a host onto its destination
    Migrate {
        /// Path to the JSON host configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Reuse the configured destination instead of provisioning
        #[arg(long)]
        resume: bool,

        /// Resolve against the legacy (first-generation) catalog
        #[arg(long)]
        legacy: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Profile {
            config,
            json,
            legacy,
        } => commands::cmd_profile(&config, json, legacy, cli.verbose).await,
        Commands::Migrate {
            config,
            resume,
            legacy,
        } => commands::cmd_migrate(&config, resume, legacy, cli.verbose).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
