//! Configuration view and validation commands: `coursehub config`.

use anyhow::{Result, bail};
use std::path::Path;

use super::super::ConfigCommands;
use coursehub::config::AppConfig;

pub fn cmd_config(config_path: &Path, config: &AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file at {}, using defaults", config_path.display());
            }
            println!("# Effective values (with env/CLI overrides):");
            print!("{}", config.to_redacted_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                bail!("{} configuration problem(s) found", problems.len());
            }
        }
    }
    Ok(())
}
