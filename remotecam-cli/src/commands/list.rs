//! List cameras command

use anyhow::{Context, Result};
use clap::Args;
use remotecam_core::capture::{self, SensorInfo};
use remotecam_core::config::{CaptureConfiguration, ConfigFile, ViewState, FPS_BUCKETS};
use remotecam_core::formats::hardware_fixed_fps;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Camera backend (synthetic, v4l2); defaults to the configured one
    #[arg(short, long)]
    backend: Option<String>,
}

/// List cameras with the options each one negotiates
pub async fn list(args: ListArgs) -> Result<()> {
    println!("RemoteCam - Available Cameras\n");

    let backend_name = args
        .backend
        .unwrap_or_else(|| ConfigFile::load_or_default().capture.backend);
    let backend = capture::create_backend(&backend_name)?;
    let sensors = capture::list_sensors(backend.as_ref())
        .with_context(|| format!("Failed to enumerate cameras on backend '{}'", backend_name))?;

    if sensors.is_empty() {
        println!("No cameras found on backend '{}'.", backend_name);
        println!(
            "\nAvailable backends: {}",
            capture::backend_names().join(", ")
        );
        return Ok(());
    }

    println!("{:<16} {:<28} {:<10} {:<8}", "ID", "Name", "Facing", "Rotate");
    println!("{}", "-".repeat(64));

    for sensor in &sensors {
        print_sensor(sensor);
    }

    println!(
        "\nStream rates: {} fps",
        FPS_BUCKETS
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Select a camera with 'remotecam serve --camera <ID>'.");

    Ok(())
}

fn print_sensor(sensor: &SensorInfo) {
    let descriptor = &sensor.descriptor;
    println!(
        "{:<16} {:<28} {:<10} {}°",
        descriptor.camera_id,
        truncate(&descriptor.title, 26),
        descriptor.facing,
        descriptor.orientation
    );

    let chars = sensor.characteristics.as_ref();
    if chars.is_none() {
        println!("    (characteristics unavailable, using fallback sizes)");
    }

    let config = CaptureConfiguration::resolve(
        &ViewState::default().with_camera(descriptor.camera_id.clone()),
        descriptor,
        chars,
    );
    let sizes = config
        .available_resolutions
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}", i, r))
        .collect::<Vec<_>>()
        .join("  ");
    println!(
        "    Output:   {} ({:?})",
        config.pixel_format, config.negotiation
    );
    println!("    Sizes:    {}", sizes);
    println!(
        "    Hardware: {} fps",
        hardware_fixed_fps(chars)
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if config.continuous_autofocus {
        println!("    Autofocus: continuous");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
