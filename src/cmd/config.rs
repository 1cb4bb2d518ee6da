//! Configuration view and validation commands: `pushpoll config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use pushpoll::config::Config;

use super::super::{Cli, ConfigCommands};

const DEFAULT_CONFIG_FILE: &str = "pushpoll.toml";

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = super::super::load_config(cli)?;

            println!();
            println!("Pushpoll Configuration");
            println!("======================");
            println!();
            match &cli.config {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("Config file: none (defaults + environment)"),
            }
            println!();
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            println!();
            println!(
                "api_key = {}",
                if config.has_api_key() { "(set)" } else { "(not set)" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = super::super::load_config(cli)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            write_default(&path)?;
        }
    }

    Ok(())
}

fn write_default(path: &Path) -> Result<()> {
    if path.exists() {
        println!("{} already exists.", path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    let content = Config::default()
        .to_toml()
        .context("Failed to render default configuration")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    println!();
    println!("You can now customize:");
    println!("  - [server] host, port");
    println!("  - [completion] api_base, model, max_tokens");
    println!("  - [relay] deadline_secs and [poll] recheck_delay_secs, mode, retention_secs");
    println!();
    Ok(())
}
