//! Microphone Array Streamer
//!
//! Waits for one peer on the configured port and streams (or records)
//! frames until the peer disconnects or Ctrl+C is pressed.
//!
//! Usage: `streamer [config.toml]` or `streamer --list-devices`

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_array_streamer::{
    audio::device::list_devices,
    config::AppConfig,
    session::{SessionController, SessionSummary, TracingIndicator},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        println!("\n=== Available Input Devices ===");
        for device in list_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    tracing::info!("Starting microphone array streamer");

    let config_path = arg.map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    tracing::info!(
        "Frames of {} samples x {} channels ({} bytes), port {}",
        config.capture.samples_per_frame,
        config.capture.channels,
        config.capture.frame_layout()?.byte_len(),
        config.network.port
    );

    let mut controller = SessionController::new(config, TracingIndicator::new());
    let stop = controller.stop_handle();
    let mut session = tokio::task::spawn_blocking(move || controller.serve_once());

    tokio::select! {
        joined = &mut session => report(joined??),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, stopping session");
            stop.stop();
            match tokio::time::timeout(Duration::from_secs(5), session).await {
                Ok(joined) => report(joined??),
                Err(_) => tracing::warn!("Session did not stop in time, exiting"),
            }
        }
    }

    Ok(())
}

fn report(summary: SessionSummary) {
    if let Err(e) = &summary.capture {
        tracing::error!("Capture failed: {}", e);
    }
    if let Some(e) = &summary.transmit.failure {
        tracing::info!("Session ended by sink: {}", e);
    }
    tracing::info!(
        "Sent {} frames ({:.1} KB), dropped {}",
        summary.stats.frames_sent,
        summary.stats.bytes_sent as f64 / 1024.0,
        summary.stats.frames_dropped
    );
}
