//! Preview-pipeline binary: opens a camera and runs the preview loop.

use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use preview_pipeline::{
    convert_frame_to_rgb, CaptureConfig, CaptureLoop, DeviceSession, V4L2Platform,
};

/// Capture preview frames from a V4L2 camera.
#[derive(Debug, Parser)]
#[command(name = "preview-pipeline", version, about)]
struct Cli {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera index, counted over capture devices.
    #[arg(long)]
    camera: Option<u32>,

    /// Requested preview width.
    #[arg(long)]
    width: Option<u32>,

    /// Requested preview height.
    #[arg(long)]
    height: Option<u32>,

    /// Frames to capture before exiting.
    #[arg(long, default_value_t = 30)]
    frames: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    run(&config, cli.frames)
}

fn load_config(cli: &Cli) -> Result<CaptureConfig> {
    let config = match &cli.config {
        Some(path) => CaptureConfig::load(path)?,
        None => CaptureConfig::default(),
    };
    let mut config = config.with_env_overrides();

    if let Some(camera) = cli.camera {
        config.camera_index = camera;
    }
    if let Some(width) = cli.width {
        config.preview_width = width;
    }
    if let Some(height) = cli.height {
        config.preview_height = height;
    }
    config.validate()?;
    Ok(config)
}

fn run(config: &CaptureConfig, frames: u64) -> Result<()> {
    let mut session = DeviceSession::open(&V4L2Platform, config.camera_index)
        .with_context(|| format!("opening camera {}", config.camera_index))?;

    let info = session.device().info().clone();
    let capabilities = session.capabilities();
    tracing::info!(
        driver = %info.driver,
        card = %info.card,
        cameras = session.camera_count(),
        ?capabilities,
        "camera ready"
    );

    let preview = session.select_best_preview_size(config.target_preview_size())?;
    let picture = session.select_best_picture_size()?;
    tracing::info!(%preview, %picture, "sizes selected");

    if let Some(mode) = config.flash_mode() {
        if !session.set_flash_mode(&mode) {
            tracing::warn!(%mode, "flash mode not applied");
        }
    }

    if config.pooled_preview {
        let ids = session.allocate_preview_buffers(config.buffer_count)?;
        tracing::info!(buffers = ids.len(), "preview buffers registered");
    }

    let mut remaining = frames;
    let capture = CaptureLoop::spawn(session, move |bytes, size, meta| {
        match convert_frame_to_rgb(bytes, size.width, size.height) {
            Ok(pixels) => {
                let total: u64 = pixels.iter().map(|pixel| u64::from(pixel & 0xFF)).sum();
                let mean = total / u64::try_from(pixels.len().max(1)).unwrap_or(1);
                tracing::info!(
                    sequence = meta.sequence,
                    bytes = meta.bytes_used,
                    mean_luma = mean,
                    "frame"
                );
            }
            Err(err) => tracing::warn!(sequence = meta.sequence, error = %err, "unreadable frame"),
        }

        remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    let outcome = capture.join()?;
    tracing::info!(
        frames = outcome.stats.frames,
        starved = outcome.stats.starved,
        "capture finished"
    );
    let error = outcome.error;
    outcome.session.close();

    match error {
        Some(err) => Err(err).context("capture failed"),
        None => Ok(()),
    }
}
