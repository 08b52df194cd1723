mod net;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use arena::DEFAULT_PORT;
use arena::net::INPUT_UPDATE_FREQUENCY;
use net::{ClientConfig, NetworkClient};

#[derive(Parser)]
#[command(name = "arena-client")]
#[command(about = "Headless arena client")]
struct Args {
    #[arg(
        short,
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:27015)"
    )]
    server: Option<String>,

    #[arg(long, help = "Find a server through LAN discovery beacons")]
    discover: bool,

    #[arg(short, long, default_value = "bot")]
    name: String,

    #[arg(long, default_value_t = 60, help = "Local frames per second")]
    fps: u32,

    #[arg(long, default_value_t = INPUT_UPDATE_FREQUENCY, help = "Input messages per second")]
    frequency: u32,

    #[arg(long, help = "Leave after this many seconds")]
    duration: Option<u64>,

    #[arg(long, default_value_t = rand::random(), hide_default_value = true)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    anyhow::ensure!(args.fps > 0, "--fps must be positive");
    anyhow::ensure!(args.frequency > 0, "--frequency must be positive");

    let config = ClientConfig {
        name: args.name,
        frame_rate: args.fps,
        input_frequency: args.frequency,
        seed: args.seed,
        ..ClientConfig::default()
    };

    let server = match (&args.server, args.discover) {
        (Some(addr), _) => resolve(addr)?,
        (None, true) => {
            let wait = Duration::from_secs(config.discovery_wait_secs);
            NetworkClient::discover(wait)?.context("no open server found on the LAN")?
        }
        (None, false) => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
    };

    let mut client = NetworkClient::new(config)?;
    client.connect(server);
    client.run(args.duration.map(Duration::from_secs))?;

    let stats = client.stats();
    log::info!(
        "{} packets sent, {} received, {} reliable resent",
        stats.packets_sent,
        stats.packets_received,
        stats.reliable_resent
    );
    Ok(())
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    let with_port = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    };
    with_port
        .to_socket_addrs()
        .with_context(|| format!("resolving {}", with_port))?
        .next()
        .with_context(|| format!("no address for {}", with_port))
}
