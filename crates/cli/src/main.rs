//! nexus CLI — the main entry point.
//!
//! Commands:
//! - `turn`    — Process a single turn and print the result as JSON
//! - `chat`    — Interactive conversation carrying history between turns
//! - `config`  — Show, locate, validate, or initialize the config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "nexus",
    about = "nexus — per-turn LLM orchestration governor",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.nexus/config.toml)
    #[arg(short, long, global = true, env = "NEXUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one turn and print the result as JSON
    Turn {
        /// User the turn belongs to
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Session id
        #[arg(short, long, default_value = "default")]
        session: String,

        /// The request text
        #[arg(short, long)]
        message: String,
    },

    /// Interactive chat
    Chat {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(commands::default_config_path);

    // Config is read before logging starts so its json_logs flag applies.
    let config = nexus_config::GovernorConfig::load_with_env(&config_path);
    let json_logs = cli.json_logs
        || config
            .as_ref()
            .map(|c| c.telemetry.json_logs)
            .unwrap_or(false);
    init_tracing(cli.verbose, json_logs);

    match cli.command {
        Commands::Turn {
            user,
            session,
            message,
        } => commands::turn::run(config?, &user, &session, &message).await?,
        Commands::Chat { user, session } => commands::chat::run(config?, &user, session).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config?)?,
            ConfigAction::Path => commands::config_cmd::path(&config_path),
            ConfigAction::Validate => commands::config_cmd::validate(&config_path, config)?,
            ConfigAction::Init { force } => commands::config_cmd::init(&config_path, force)?,
        },
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // Logs go to stderr so stdout stays machine-readable.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}
