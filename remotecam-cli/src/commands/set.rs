//! Set command - change capture settings of the running server

use anyhow::{bail, Context, Result};
use clap::Args;
use remotecam_core::config::{Rotation, FPS_BUCKETS};
use remotecam_core::ipc::IpcClient;

/// Arguments for the set command
#[derive(Args)]
pub struct SetArgs {
    /// Switch to another camera
    #[arg(short, long)]
    camera: Option<String>,

    /// Stream frame rate (30, 15, 10, 5, 2, 1)
    #[arg(short, long)]
    fps: Option<u32>,

    /// Index into the camera's size list (0 = largest)
    #[arg(short, long)]
    resolution: Option<usize>,

    /// JPEG quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Display rotation in degrees (0, 90, 180, 270)
    #[arg(long)]
    rotation: Option<u32>,

    /// Publish frames to viewers (true/false)
    #[arg(long)]
    stream: Option<bool>,
}

impl SetArgs {
    fn is_empty(&self) -> bool {
        self.camera.is_none()
            && self.fps.is_none()
            && self.resolution.is_none()
            && self.quality.is_none()
            && self.rotation.is_none()
            && self.stream.is_none()
    }
}

/// Apply a partial view update over the control socket
pub async fn set(args: SetArgs) -> Result<()> {
    if args.is_empty() {
        bail!("Nothing to change. See 'remotecam set --help'.");
    }

    let mut client = IpcClient::connect()
        .await
        .context("Failed to connect to server")?;
    let mut view = client
        .view_state()
        .await
        .context("Failed to read current settings")?;

    if let Some(camera) = args.camera {
        // Indices refer to the old camera's lists
        view = view.with_camera(camera);
        view.resolution_index = None;
    }
    if let Some(fps) = args.fps {
        let index = FPS_BUCKETS
            .iter()
            .position(|&f| f == fps)
            .with_context(|| format!("Invalid fps {}. Valid options: 30, 15, 10, 5, 2, 1", fps))?;
        view = view.with_fps_index(index);
    }
    if let Some(index) = args.resolution {
        view = view.with_resolution_index(index);
    }
    if let Some(quality) = args.quality {
        view = view.with_quality(quality);
    }
    if let Some(degrees) = args.rotation {
        view = view.with_rotation(Rotation::try_from(degrees).map_err(anyhow::Error::msg)?);
    }
    if let Some(stream) = args.stream {
        view = view.with_stream(stream);
    }

    client
        .set_view_state(view.clone())
        .await
        .context("Server rejected the settings")?;

    println!("Updated settings:");
    println!("  Camera:     {}", view.camera_id);
    println!("  Stream:     {}", view.stream);
    println!("  Quality:    {}", view.quality);
    println!("  Rotation:   {}", view.rotation);
    if let Some(index) = view.fps_index {
        println!("  Framerate:  {} fps", FPS_BUCKETS[index.min(FPS_BUCKETS.len() - 1)]);
    }
    if let Some(index) = view.resolution_index {
        println!("  Size index: {}", index);
    }

    Ok(())
}
