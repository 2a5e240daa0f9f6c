mod capability;
mod command;
mod config;
mod connection;
mod console;
mod device;
mod events;
mod runtime;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use command::handlers::switch;
use config::{DeviceIdentity, OnboardingConfig, RuntimeConfig};
use connection::LoopbackEngine;
use device::Device;
use runtime::Runtime;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use stdevice_shared::wire::FrameDecoder;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Direct-connected smart switch
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Device identity document
    #[arg(long, default_value = config::DEFAULT_DEVICE_INFO_PATH)]
    device_info: PathBuf,

    /// Onboarding parameters document
    #[arg(long, default_value = config::DEFAULT_ONBOARDING_CONFIG_PATH)]
    onboarding_config: PathBuf,

    /// Seconds the engine is given to accept the session
    #[arg(long, value_name = "SECS")]
    start_timeout: Option<u64>,

    /// Read inbound events from stdin: `[component/]capability command [args...]`
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let identity =
        DeviceIdentity::load(&args.device_info).context("Failed to initialize device")?;
    let onboarding =
        OnboardingConfig::load(&args.onboarding_config).context("Failed to initialize device")?;

    let mut config = RuntimeConfig::default();
    if let Some(secs) = args.start_timeout {
        config.start_timeout = Duration::from_secs(secs);
    }

    let (device, engine) = Device::bring_up::<LoopbackEngine>(&identity, &onboarding, config)
        .context("Failed to initialize device")?;
    info!("Device starting: {}", engine.device_name());

    if let Some(outbound) = engine.take_outbound() {
        tokio::spawn(log_outbound(outbound));
    }

    switch::install(device.registry()).context("Failed to initialize capability")?;

    let runtime = Runtime::new(device);
    let shutdown = runtime.shutdown_handle();
    let _ctrl_c = shutdown.on_ctrl_c();

    if args.interactive {
        let lines = console::spawn_line_reader(BufReader::new(std::io::stdin()))
            .context("Failed to start console")?;
        tokio::spawn(console::run(engine, lines, shutdown.clone()));
    }

    info!("STARTING DEVICE");
    let summary = runtime.run().await?;

    if !shutdown.is_triggered() {
        warn!("Engine stopped delivering events");
    }
    if !summary.drained {
        warn!("Some handlers were still running at exit");
    }
    info!("EXITING");
    Ok(())
}

/// Log every attribute update the engine puts on the wire
///
/// Returns the number of updates decoded once the stream ends.
async fn log_outbound(mut outbound: mpsc::Receiver<Bytes>) -> usize {
    let mut decoder = FrameDecoder::new();
    let mut decoded = 0;

    while let Some(frame) = outbound.recv().await {
        decoder.extend(&frame);
        loop {
            match decoder.decode_next() {
                Ok(Some(event)) => {
                    decoded += 1;
                    match event.typed_value() {
                        Ok(value) => info!(
                            "[CLOUD] {}/{} {} = {} (seq {})",
                            event.component,
                            event.capability,
                            event.attribute,
                            value,
                            event.sequence_number
                        ),
                        Err(e) => warn!("[CLOUD] Unreadable attribute {}: {}", event.attribute, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("[CLOUD] Dropping outbound stream: {}", e);
                    return decoded;
                }
            }
        }
    }

    if decoder.buffer_len() > 0 {
        warn!(
            "[CLOUD] Outbound stream ended inside a frame, {} byte(s) discarded",
            decoder.buffer_len()
        );
    }
    decoded
}
