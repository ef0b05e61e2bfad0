//! Duet CLI — the main entry point.
//!
//! Commands:
//! - `session` — Open a document and work on it with the collaborator
//! - `check`   — Validate a document without running it
//! - `init`    — Write a starter document
//! - `call`    — Load a document's kernel and call one function
//! - `doctor`  — Diagnose configuration and credentials

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "duet",
    about = "Duet — a self-editing document you write together with an AI collaborator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.duet/config.toml
    #[arg(long, global = true, env = "DUET_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a document in the interactive session
    Session {
        /// Document to open (defaults to document.path from the config)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate a document's structure and kernel syntax
    Check {
        path: PathBuf,

        /// Also load the kernel and report its bindings
        #[arg(long)]
        load: bool,
    },

    /// Write a starter document
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Also write a default config file if none exists
        #[arg(long)]
        with_config: bool,
    },

    /// Load a document's kernel and call one function
    Call {
        path: PathBuf,

        /// Function to call
        name: String,

        /// Arguments, as kernel literals (e.g. 2, "text", [1, 2])
        args: Vec<String>,
    },

    /// Diagnose configuration and credentials
    Doctor {
        /// Also send a minimal request to the provider
        #[arg(long)]
        ping: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; stdout belongs to the session
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Session { file } => commands::session::run(config_path, file).await?,
        Commands::Check { path, load } => commands::check::run(config_path, &path, load).await?,
        Commands::Init {
            path,
            force,
            with_config,
        } => commands::init::run(config_path, &path, force, with_config).await?,
        Commands::Call { path, name, args } => {
            commands::call::run(config_path, &path, &name, &args).await?
        }
        Commands::Doctor { ping } => commands::doctor::run(config_path, ping).await?,
    }

    Ok(())
}
