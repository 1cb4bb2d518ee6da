use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pushpoll::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "pushpoll")]
#[command(version, about = "Server-push versus polling demo server with an OpenAI relay")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Path to a pushpoll.toml configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to bind. Overrides HOST and the config file.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to serve on. Overrides PORT and the config file.
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (the default)
    Serve,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default pushpoll.toml file
    Init,
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "pushpoll=debug,tower_http=debug"
    } else {
        "pushpoll=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Defaults, then the config file, then the environment, then CLI flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        None | Some(Commands::Serve) => cmd::cmd_serve(load_config(&cli)?).await?,
        Some(Commands::Config { command }) => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
