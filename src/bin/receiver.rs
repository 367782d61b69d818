//! Frame Receiver
//!
//! Connects to a streamer, performs the handshake and decodes the incoming
//! frames, logging per-channel levels. Optionally saves the raw stream.
//!
//! Usage: `receiver [addr] [N|L] [samples_per_frame] [channels] [out.raw]`

use anyhow::{bail, Context, Result};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_array_streamer::{
    audio::frame::{Frame, FrameLayout},
    constants::*,
    network::handshake::{self, Mode, HOST_ID_MAX},
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

    let args: Vec<String> = std::env::args().collect();
    let addr = args.get(1).cloned().unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));
    let mode = match args.get(2).map(String::as_str) {
        None | Some("N") => Mode::Network,
        Some("L") => Mode::Local,
        Some(other) => bail!("Unknown mode {:?}, expected N or L", other),
    };
    let samples_per_frame = match args.get(3) {
        Some(v) => v.parse().context("Invalid samples_per_frame")?,
        None => DEFAULT_SAMPLES_PER_FRAME,
    };
    let channels = match args.get(4) {
        Some(v) => v.parse().context("Invalid channel count")?,
        None => DEFAULT_CHANNELS,
    };
    let layout = FrameLayout::new(samples_per_frame, channels)?;

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Cannot connect to {}", addr))?;
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    (&mut reader).take(HOST_ID_MAX as u64).read_line(&mut line).await?;
    let host = handshake::parse_preamble(&line)?;
    tracing::info!("Connected to {} at {}", host, addr);

    reader.get_mut().write_all(&[mode.as_byte()]).await?;

    if mode == Mode::Local {
        tracing::info!("{} is recording locally, press Ctrl+C to end the recording", host);
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let mut output = match args.get(5) {
        Some(path) => Some(tokio::fs::File::create(path).await?),
        None => None,
    };

    tracing::info!(
        "Receiving frames of {} samples x {} channels ({} bytes)",
        layout.samples_per_frame(),
        layout.channels(),
        layout.byte_len()
    );

    let mut buf = vec![0u8; layout.byte_len()];
    let mut frames: u64 = 0;
    let start = Instant::now();

    loop {
        tokio::select! {
            read = reader.read_exact(&mut buf) => {
                match read {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::info!("Stream closed by {}", host);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }

                let frame = Frame::decode(layout, &buf)?;
                frames += 1;
                if let Some(file) = output.as_mut() {
                    file.write_all(&buf).await?;
                }

                let stats = frame.stats();
                tracing::info!(
                    "Frame {} ({:.1}s): peak {:?}, rms {:?}",
                    frames,
                    start.elapsed().as_secs_f64(),
                    stats.peak,
                    stats.rms.iter().map(|r| r.round() as i64).collect::<Vec<_>>()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, disconnecting");
                break;
            }
        }
    }

    if let Some(file) = output.as_mut() {
        file.flush().await?;
    }
    tracing::info!(
        "Received {} frames ({:.1} KB) in {:.1}s",
        frames,
        (frames * layout.byte_len() as u64) as f64 / 1024.0,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
