use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hexapod_runtime::config::{HexapodConfig, SERVO_PORT};
use hexapod_runtime::motor::ServoBusActuators;
use hexapod_runtime::motor::lx16a::DEFAULT_BAUDRATE;
use hexapod_runtime::robot::{JointLimits, RobotContext, SystemClock};
use hexapod_runtime::sim::SimHexapod;

#[derive(Parser, Debug)]
#[command(about = "Hexapod motion runtime: gaits, ground contact and balance over zenoh")]
struct Args {
    /// TOML configuration file; defaults are used for anything it omits
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the LX-16A servo bus
    #[arg(short, long, default_value = SERVO_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Discard the transmit echo of one-wire bus adapters
    #[arg(long)]
    echo: bool,

    /// Run against the simulated robot instead of the servo bus
    #[arg(long)]
    sim: bool,
}

fn build_context(
    args: &Args,
    config: &HexapodConfig,
) -> Result<RobotContext, Box<dyn std::error::Error + Send + Sync>> {
    let limits = JointLimits::from_config(config);
    if args.sim {
        info!("Using simulated hexapod");
        let sim = SimHexapod::standing(config);
        let ctx = sim
            .context_with_clock(config, Box::new(SystemClock::new()))
            .with_contacts(Box::new(sim.contacts()))
            .with_accelerometer(Box::new(sim.accelerometer()));
        return Ok(ctx);
    }

    let mut servos = ServoBusActuators::open(&args.port, args.baud, args.echo)?;
    servos.initialize()?;
    match servos.supply_voltage() {
        Ok(mv) => info!("Servo supply: {:.2} V", f64::from(mv) / 1000.0),
        Err(e) => warn!("Could not read servo supply voltage: {}", e),
    }
    // No foot switches or IMU on the servo-only build
    Ok(RobotContext::new(
        Box::new(servos),
        Box::new(SystemClock::new()),
        limits,
    ))
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HexapodConfig::load(path),
        None => {
            let config = HexapodConfig::default();
            config.validate().map(|()| config)
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match build_context(&args, &config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Hardware setup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = hexapod_runtime::runtime::run(config, ctx).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
