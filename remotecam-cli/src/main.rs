//! RemoteCam CLI
//!
//! Serve a camera as an authenticated MJPEG stream.
//!
//! # Usage
//!
//! ```bash
//! # List cameras and what they can do
//! remotecam list
//!
//! # Serve camera 0 on port 59713
//! remotecam serve
//!
//! # Drop the running daemon to 5fps
//! remotecam set --fps 5
//!
//! # Stop serving
//! remotecam stop
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// RemoteCam - camera streaming over HTTP
#[derive(Parser)]
#[command(name = "remotecam")]
#[command(version)]
#[command(about = "Serve a camera as an authenticated MJPEG stream", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras and their capture options
    #[command(alias = "ls")]
    List(commands::ListArgs),

    /// Capture and serve the MJPEG stream in the foreground
    Serve(commands::ServeArgs),

    /// Show status of the running server
    Status,

    /// Stop the running server
    Stop,

    /// Change capture settings of the running server
    Set(commands::SetArgs),

    /// Change the stream password
    Passwd(commands::PasswdArgs),

    /// Manage configuration
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let directive = format!("remotecam={}", level)
        .parse()
        .context("Invalid log directive")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_target(false)
        .init();

    match cli.command {
        Commands::List(args) => commands::list(args).await?,
        Commands::Serve(args) => commands::serve(args).await?,
        Commands::Status => commands::status().await?,
        Commands::Stop => commands::stop().await?,
        Commands::Set(args) => commands::set(args).await?,
        Commands::Passwd(args) => commands::passwd(args).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
