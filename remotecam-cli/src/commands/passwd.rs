//! Passwd command - change the stream password

use anyhow::{bail, Context, Result};
use clap::Args;
use remotecam_core::config::{ConfigFile, StateFile};
use remotecam_core::ipc::{self, IpcClient};
use remotecam_core::output::{AccessControl, CredentialStore, TokenPolicy};
use std::io::BufRead;

/// Arguments for the passwd command
#[derive(Args)]
pub struct PasswdArgs {
    /// New password; read from stdin when omitted
    password: Option<String>,

    /// Write the state file directly even if a server is running
    #[arg(long)]
    offline: bool,
}

/// Change the password of the running server, or the stored one
pub async fn passwd(args: PasswdArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => read_password()?,
    };
    if password.trim().is_empty() {
        bail!("Password must not be empty");
    }

    if !args.offline && ipc::daemon_running().await {
        let mut client = IpcClient::connect()
            .await
            .context("Failed to connect to server")?;
        client
            .change_password(&password)
            .await
            .context("Failed to change password")?;
        println!("Password changed. Existing viewer links are no longer valid.");
        return Ok(());
    }

    let path = ConfigFile::load_or_default()
        .credentials
        .path
        .unwrap_or_else(StateFile::default_path);
    let access = AccessControl::new(CredentialStore::file(&path), TokenPolicy::default())
        .context("Failed to load stored credentials")?;
    access
        .change_password(&password)
        .context("Failed to change password")?;

    println!("Password stored in {}", path.display());
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("New password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
