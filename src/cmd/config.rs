//! Configuration view and initialization commands (`buildbay config`).

use std::path::Path;

use anyhow::{Context, Result, bail};

use buildbay::config::OrchestratorConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: &OrchestratorConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# Config file: {} (not found, using defaults)", config_path.display());
            }
            println!("# Environment overrides applied");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!(
                    "{} already exists. Remove it first to regenerate.",
                    config_path.display()
                );
            }
            let rendered = OrchestratorConfig::default().to_toml()?;
            std::fs::write(config_path, rendered)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }
    Ok(())
}
