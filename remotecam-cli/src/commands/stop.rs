//! Stop command - stop the running server

use anyhow::{Context, Result};
use remotecam_core::ipc::IpcClient;
use remotecam_core::RemoteCamError;

/// Ask the running server to shut down
pub async fn stop() -> Result<()> {
    println!("RemoteCam - Stop Server\n");

    let mut client = match IpcClient::connect().await {
        Ok(client) => client,
        Err(RemoteCamError::NoActiveSession) => {
            println!("No RemoteCam server is running.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to connect to server"),
    };

    client.stop().await.context("Failed to send stop request")?;
    println!("Server is stopping.");

    Ok(())
}
