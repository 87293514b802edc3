//! Serve command - capture and stream in the foreground

use anyhow::{bail, Context, Result};
use clap::Args;
use remotecam_core::capture;
use remotecam_core::config::{ConfigFile, Rotation, StateFile, FPS_BUCKETS};
use remotecam_core::events::EngineEvent;
use remotecam_core::ipc::{self, IpcServer};
use remotecam_core::pipeline::{Pipeline, PipelineOptions};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Config file to load instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera backend (synthetic, v4l2)
    #[arg(short, long)]
    backend: Option<String>,

    /// Camera id to open (see 'remotecam list')
    #[arg(short, long)]
    camera: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

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
}

impl ServeArgs {
    fn apply(&self, config: &mut ConfigFile) -> Result<()> {
        if let Some(backend) = &self.backend {
            config.capture.backend = backend.clone();
        }
        if let Some(camera) = &self.camera {
            config.capture.camera_id = camera.clone();
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(fps) = self.fps {
            let index = FPS_BUCKETS.iter().position(|&f| f == fps).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid fps {}. Valid options: 30, 15, 10, 5, 2, 1",
                    fps
                )
            })?;
            config.capture.fps_index = Some(index);
        }
        if let Some(index) = self.resolution {
            config.capture.resolution_index = Some(index);
        }
        if let Some(quality) = self.quality {
            config.capture.quality = quality;
        }
        if let Some(degrees) = self.rotation {
            config.capture.rotation = Rotation::try_from(degrees).map_err(anyhow::Error::msg)?;
        }
        config.validate()?;
        Ok(())
    }
}

/// Run the pipeline until interrupted or stopped over IPC
pub async fn serve(args: ServeArgs) -> Result<()> {
    println!("RemoteCam - Starting Server\n");

    if ipc::daemon_running().await {
        bail!("A RemoteCam server is already running. Stop it with 'remotecam stop'.");
    }

    let mut config = match &args.config {
        Some(path) => ConfigFile::load_from(path.clone())
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::load_or_default(),
    };
    args.apply(&mut config)?;

    let state_path = config
        .credentials
        .path
        .clone()
        .unwrap_or_else(StateFile::default_path);

    println!("Configuration:");
    println!("  Backend:     {}", config.capture.backend);
    println!("  Camera:      {}", config.capture.camera_id);
    println!("  Listen:      {}", config.server.socket_addr());
    println!("  Quality:     {}", config.capture.quality);
    println!("  Rotation:    {}", config.capture.rotation);
    println!("  Credentials: {}", state_path.display());
    println!();

    let backend = capture::create_backend(&config.capture.backend)?;
    let options = PipelineOptions::from_config(&config);
    let pipeline = Arc::new(
        Pipeline::start(backend, options)
            .await
            .context("Failed to start pipeline")?,
    );

    StateFile::set_manually_stopped(&state_path, false)
        .context("Failed to update state file")?;

    let mut server = IpcServer::new(pipeline.clone());
    server.start().await.context("Failed to start control socket")?;

    println!("Streaming at http://{}/", pipeline.local_addr());
    println!("Log in with the stream password to get a viewer link.");
    println!("Press Ctrl+C to stop...\n");

    let events = pipeline.subscribe();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\nReceived interrupt signal...");
        }
        result = server.run() => {
            result.context("Control socket failed")?;
            println!("\nStop requested...");
        }
        _ = print_events(events) => {
            info!("Event stream ended");
        }
    }

    println!("Stopping server...");
    pipeline.stop().await;
    server.cleanup();

    if let Err(e) = StateFile::set_manually_stopped(&state_path, true) {
        warn!("Failed to record manual stop: {}", e);
    }

    println!("{}", pipeline.stats());
    println!("Server stopped.");

    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Status(update)) => println!("{}", update),
            Ok(EngineEvent::StateChanged { state }) => println!("State: {}", state),
            Ok(EngineEvent::Fault { message }) => eprintln!("Camera fault: {}", message),
            Ok(EngineEvent::Quick(quick)) => debug!("{}", quick),
            Err(RecvError::Lagged(missed)) => debug!("Missed {} engine events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
