//! Status command - show status of the running server

use anyhow::{Context, Result};
use remotecam_core::ipc::IpcClient;
use remotecam_core::RemoteCamError;

/// Query the running server over the control socket
pub async fn status() -> Result<()> {
    println!("RemoteCam - Status\n");

    let mut client = match IpcClient::connect().await {
        Ok(client) => client,
        Err(RemoteCamError::NoActiveSession) => {
            println!("No RemoteCam server is running.");
            println!("Start one with: remotecam serve");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to connect to server"),
    };

    let status = client.status().await.context("Failed to query status")?;

    println!("  State:      {}", status.state);
    match &status.camera_title {
        Some(title) => println!("  Camera:     {} ({})", status.camera_id, title),
        None => println!("  Camera:     {}", status.camera_id),
    }
    if let Some(resolution) = status.resolution {
        println!("  Resolution: {}", resolution);
    }
    if let Some(fps) = status.fps {
        println!("  Framerate:  {} fps", fps);
    }
    println!("  URL:        {}", status.url);
    println!("  Clients:    {}", status.clients);
    println!("  PID:        {}", status.pid);
    println!("  Uptime:     {}", format_uptime(status.uptime_seconds));
    if let Some(error) = &status.error {
        println!("  Error:      {}", error);
    }

    let stats = client.stats().await.context("Failed to query statistics")?;
    println!();
    println!("  Captured:   {}", stats.counters.captured);
    println!("  Kept:       {}", stats.counters.kept);
    println!("  Encoded:    {}", stats.counters.encoded);
    println!("  Dropped:    {} encoder, {} channel", stats.counters.dropped, stats.channel_dropped);
    println!(
        "  Encode:     {:.1}ms avg, {:.1} fps actual",
        stats.encode_latency_ms, stats.actual_fps
    );

    Ok(())
}

fn format_uptime(seconds: f64) -> String {
    let total = seconds as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5.7), "5s");
        assert_eq!(format_uptime(125.0), "2m 5s");
        assert_eq!(format_uptime(3725.0), "1h 2m 5s");
    }
}
