//! Mic Bridge: stream a raw 16-bit PCM microphone from a serial port to speakers or a WAV file.
//!
//! ## Pipeline
//! 1. **Align**: collect a short burst of bytes and pick the byte parity that looks like audio.
//! 2. **Process**: each chunk goes through a Butterworth filter and a gain stage.
//! 3. **Supervise**: raw chunk levels are watched; a stuck or overloaded stream is realigned,
//!    and a dead one reconnected.
//! 4. **Sink**: `play` pushes to a CPAL output (resampled if the device rate differs), `record`
//!    writes a mono WAV file.
//!
//! Ctrl-C stops the stream cleanly; a second Ctrl-C exits immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mic_bridge::{cli, config::BridgeConfig, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,mic_bridge=info,mic_pipeline=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            tracing::info!("stopping (Ctrl-C again to force)");
        }) {
            tracing::warn!("could not install Ctrl-C handler: {e}");
        }
    }

    match BridgeConfig::from_args(&args) {
        BridgeConfig::Play(config) => {
            runtime::run_play(config, cancel)?;
        }
        BridgeConfig::Record(config) => {
            let path = config.path.clone();
            let summary = runtime::run_record(config, cancel)?;
            println!(
                "saved {} samples to {}",
                summary.samples,
                path.display()
            );
        }
    }

    Ok(())
}
