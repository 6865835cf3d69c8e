use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ota_core::payload::FirmwareImage;
use ota_core::session::{OtaSession, SessionConfig};
use ota_core::transport::{BleOptions, BleTransport};
use ota_core::{OtaEvent, OtaObserver, TracingObserver};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "NimBLE OTA firmware uploader", long_about = None)]
struct Args {
    /// Path to the firmware image
    firmware: Option<String>,

    /// Device address (MAC, or platform identifier on macOS)
    address: Option<String>,

    /// Session configuration file (TOML)
    #[arg(long)]
    config: Option<String>,

    /// ATT MTU of the link, used to size chunks
    #[arg(long, default_value_t = 23)]
    mtu: usize,

    /// Seconds to scan for the device
    #[arg(long, default_value_t = 5)]
    scan_timeout: u64,

    /// Give up when an acknowledgement takes longer than this
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// Give up after sending the same request this many times
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Send a stop command before disconnecting on failure
    #[arg(long)]
    send_stop: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Drives a progress bar from sector acknowledgements; everything else is
/// logged above the bar.
struct ProgressObserver {
    pb: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Result<Self> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        Ok(Self { pb })
    }
}

impl OtaObserver for ProgressObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::Progress {
                sector,
                total,
                percent,
            } => {
                self.pb.set_position(percent.round() as u64);
                self.pb.set_message(format!("sector {}/{}", sector + 1, total));
            }
            OtaEvent::Complete { .. } => {
                self.pb.finish_with_message("done");
                TracingObserver.on_event(event);
            }
            OtaEvent::Aborted { .. } => {
                self.pb.abandon();
                TracingObserver.on_event(event);
            }
            other => self.pb.suspend(|| TracingObserver.on_event(other)),
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    let value: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(label)
        .interact_text()?;
    Ok(value.trim().to_string())
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => SessionConfig::default(),
    };
    if args.ack_timeout_ms.is_some() {
        config.ack_timeout_ms = args.ack_timeout_ms;
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    if args.send_stop {
        config.send_stop_on_abort = true;
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let firmware = match args.firmware {
        Some(path) => path,
        None => prompt("Firmware file")?,
    };
    let image = FirmwareImage::load(&firmware)
        .with_context(|| format!("Invalid firmware file {}", firmware))?;
    info!(path = %firmware, size = image.len(), "Firmware loaded");

    let address = match args.address {
        Some(address) => address,
        None => prompt("Device address")?,
    };

    let options = BleOptions {
        scan_timeout: Duration::from_secs(args.scan_timeout),
        mtu: args.mtu,
    };
    let transport = BleTransport::connect(&address, &options)?;

    let observer = Arc::new(ProgressObserver::new()?);
    let session = OtaSession::with_observer(config, observer);
    let report = session.run(&transport, &image)?;

    info!(
        sectors = report.sector_count,
        retries = report.retries,
        "Firmware uploaded"
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
