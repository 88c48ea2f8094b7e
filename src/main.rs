use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use copter_teleop::config::{
    ConfigError, DEFAULT_SPEED, DEFAULT_TAKEOFF_ALTITUDE, LOCAL_PORT, NamespaceSelection,
    SessionTarget,
};
use copter_teleop::messages::{Command, CopterId};
use copter_teleop::runtime::{self, ConsoleOptions};
use copter_teleop::velocity::SpeedSetting;

/// Keyboard teleoperation for fccs copters over UDP
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Namespace, e.g. agri or protezionecivile
    #[arg(short, long)]
    namespace: String,

    /// Remote host, overrides the namespace default
    #[arg(long)]
    host: Option<String>,

    /// Remote port, overrides the namespace default
    #[arg(long)]
    port: Option<u16>,

    /// Hardware address of the copter
    #[arg(long, required_unless_present = "copter_id", conflicts_with = "copter_id")]
    mac: Option<String>,

    /// Copter id (fccs_...), when the MAC address is not known
    #[arg(long)]
    copter_id: Option<String>,

    /// Speed for every active axis
    #[arg(long, default_value_t = DEFAULT_SPEED)]
    speed: f64,

    /// Local UDP port
    #[arg(long, default_value_t = LOCAL_PORT)]
    local_port: u16,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    latitude: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    longitude: f64,

    /// Takeoff altitude in meters
    #[arg(long, default_value_t = DEFAULT_TAKEOFF_ALTITUDE)]
    altitude: f64,

    /// Send this single event and wait for the reply instead of opening the console
    #[arg(long)]
    send: Option<String>,

    /// JSON object sent as `data` with --send (default: just the copter id)
    #[arg(long, requires = "send")]
    data: Option<String>,

    /// Seconds to wait for the reply in --send mode
    #[arg(long, default_value_t = 5)]
    reply_timeout: u64,
}

fn resolve_target(args: &Args) -> Result<SessionTarget, ConfigError> {
    let selection = match (&args.host, args.port) {
        (Some(host), Some(port)) => NamespaceSelection {
            namespace: args.namespace.clone(),
            endpoint_host: host.clone(),
            port,
        },
        _ => {
            let mut sel = NamespaceSelection::lookup(&args.namespace)?;
            if let Some(host) = &args.host {
                sel.endpoint_host = host.clone();
            }
            if let Some(port) = args.port {
                sel.port = port;
            }
            sel
        }
    };
    Ok(SessionTarget::from(selection))
}

fn resolve_copter(args: &Args) -> Result<CopterId, ConfigError> {
    args.mac
        .as_deref()
        .and_then(CopterId::from_mac)
        .or_else(|| args.copter_id.as_deref().and_then(CopterId::parse))
        .ok_or_else(|| ConfigError::MissingCopterId("command line".to_string()))
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let options = ConsoleOptions {
        target: resolve_target(&args)?,
        copter_id: resolve_copter(&args)?,
        speed: SpeedSetting::new(args.speed)?,
        local_port: args.local_port,
        latitude: args.latitude,
        longitude: args.longitude,
        altitude: args.altitude,
    };

    match args.send {
        Some(event) => {
            let command = Command::custom(&event, args.data.as_deref())?;
            let timeout = Duration::from_secs(args.reply_timeout);
            let status = runtime::send_once(&options, command, timeout).await?;
            println!("{}", status);
            Ok(())
        }
        None => runtime::run(options).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see every cmd_vel)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("copter-teleop: {}", e);
        std::process::exit(1);
    }
}
