use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stewart_zenoh_runtime::config::PlatformConfig;
use stewart_zenoh_runtime::platform::DynStewartPlatform;
use stewart_zenoh_runtime::sim::SimulatedRig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stewart platform pose runtime
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON platform configuration (defaults to the reference rig)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against simulated hardware
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (info unless RUST_LOG says otherwise)
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init();

    let args = Args::parse();
    if let Err(e) = start(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` if set and valid, `info` otherwise
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn start(args: Args) -> Result<(), BoxError> {
    let config = match &args.config {
        Some(path) => PlatformConfig::load(path)?,
        None => PlatformConfig::default(),
    };

    let platform = if args.simulate {
        info!("Starting with simulated hardware");
        let (_rig, platform) = SimulatedRig::platform(&config)?;
        platform
    } else {
        hardware_platform(&config)?
    };

    stewart_zenoh_runtime::runtime::run(platform).await
}

#[cfg(feature = "rpi")]
fn hardware_platform(config: &PlatformConfig) -> Result<DynStewartPlatform, BoxError> {
    use stewart_zenoh_runtime::gpio::ResourceRegistry;
    Ok(stewart_zenoh_runtime::hardware::build_platform(
        &ResourceRegistry::global(),
        config,
    )?)
}

#[cfg(not(feature = "rpi"))]
fn hardware_platform(_config: &PlatformConfig) -> Result<DynStewartPlatform, BoxError> {
    Err("built without the `rpi` feature; rebuild with --features rpi or pass --simulate".into())
}
