use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Result};
use clap::Parser;
use sensorsync::core::{DeviceAddr, ExperimentConfig};
use sensorsync::engine::{ExperimentCoordinator, Session};
use sensorsync::observability::init_logging;

/// Calibrate networked sensor devices and stream their samples as UDP datagrams
#[derive(Parser, Debug)]
#[command(name = "sensorsync", version)]
struct Cli {
    /// Device address as `ip` or `ip:port`; repeat for several devices
    #[arg(short, long = "device", required = true)]
    devices: Vec<String>,

    /// JSON configuration file
    #[arg(short, long, env = "SENSORSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the sampling rate, in frames per second
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Override the local port frames are broadcast to
    #[arg(long)]
    broadcast_port: Option<u16>,

    /// Run the extended calibration pass after the standard one
    #[arg(long)]
    extended_calibration: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<f64>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(cli: &Cli) -> Result<ExperimentConfig> {
    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig::default(),
    };
    if let Some(rate) = cli.frame_rate {
        config.frame_rate = rate;
    }
    if let Some(port) = cli.broadcast_port {
        config.broadcast_addr.set_port(port);
    }
    config.validate()?;
    Ok(config)
}

async fn wait_for_stop(duration: Option<Duration>) {
    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(&cli)?;
    let duration = match cli.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => bail!("--duration must be a positive number of seconds, got {}", secs),
        None => None,
    };

    let mut session = Session::new(config.clone());
    for device in &cli.devices {
        let addr = DeviceAddr::parse_with_default_port(device, config.device_port)?;
        session.pair(addr)?;
    }

    let removed = session.check_connectivity().await;
    for addr in &removed {
        println!("Device {} did not answer and was removed", addr);
    }
    if session.is_empty() {
        bail!("No reachable devices");
    }

    println!("sensorsync: {} device(s), broadcasting to {}", session.len(), config.broadcast_addr);
    if duration.is_none() {
        println!("Press Ctrl-C to stop the experiment");
    }

    let mut coordinator = ExperimentCoordinator::new(session);
    let summary = coordinator
        .run(cli.extended_calibration, wait_for_stop(duration), |status| {
            print!("\r{}", status);
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();

    for (addr, scale) in coordinator.session().scale_factors() {
        if let Some(scale) = scale {
            println!("  {}  scale factor {:.6}", addr, scale);
        }
    }
    println!(
        "Done: {} frames ({} missing), {} packets sent in {:.1}s",
        summary.frames_emitted,
        summary.missing_frames,
        summary.packets_sent,
        summary.elapsed.as_secs_f64()
    );
    if !summary.drained {
        println!("Warning: output queue was not fully drained");
    }

    Ok(())
}
