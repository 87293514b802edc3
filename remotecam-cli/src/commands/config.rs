//! Config command - manage the configuration file

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use remotecam_core::config::{sample_config, ConfigFile, StateFile};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the config and state file locations
    Path,

    /// Show the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,

        /// Write the commented sample instead of bare defaults
        #[arg(short, long)]
        commented: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = ConfigFile::default_path();
            let exists = if path.exists() { "exists" } else { "does not exist" };
            println!("Config: {} ({})", path.display(), exists);

            let state = ConfigFile::load_or_default()
                .credentials
                .path
                .unwrap_or_else(StateFile::default_path);
            let exists = if state.exists() { "exists" } else { "does not exist" };
            println!("State:  {} ({})", state.display(), exists);
        }
        ConfigCommand::Show => {
            let path = ConfigFile::default_path();
            let config = ConfigFile::load_from(path.clone()).context("Invalid configuration")?;

            if path.exists() {
                println!("# Loaded from {}\n", path.display());
            } else {
                println!("# No file at {}, showing defaults\n", path.display());
            }
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        ConfigCommand::Init { force, commented } => {
            let path = ConfigFile::default_path();

            if commented {
                if path.exists() && !force {
                    println!("Configuration file already exists: {}", path.display());
                    println!("\nUse --force to overwrite, or edit the existing file.");
                    return Ok(());
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create config directory")?;
                }
                std::fs::write(&path, sample_config()).context("Failed to write config file")?;
            } else if force {
                ConfigFile::default().save()?;
            } else if !ConfigFile::create_default_if_missing()? {
                println!("Configuration file already exists: {}", path.display());
                println!("\nUse --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            println!("Created configuration file: {}", path.display());
            println!("\nEdit this file to change the camera, port or stream defaults.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
