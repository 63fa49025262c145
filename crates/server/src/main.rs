mod config;
mod events;
mod server;

use anyhow::{Context, Result};
use clap::Parser;

use roomcast::{DirectoryConfig, RoomConfig};

use config::ServerConfig;
use server::RelayServer;

#[derive(Parser)]
#[command(name = "roomcast-server")]
#[command(about = "Real-time room relay server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = roomcast::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = roomcast::room::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    #[arg(long, default_value_t = roomcast::directory::DEFAULT_MAX_ROOMS)]
    max_rooms: usize,

    #[arg(long, help = "Leave Nagle's algorithm enabled on client sockets")]
    no_nodelay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let config = ServerConfig {
        directory: DirectoryConfig {
            max_rooms: args.max_rooms,
            room: RoomConfig {
                max_clients: args.max_clients,
            },
        },
        nodelay: !args.no_nodelay,
    };

    let server = RelayServer::bind(&bind_addr, config)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    log::info!("Server started on {}", server.local_addr()?);
    server.run().await?;
    log::info!("Server shutting down");

    Ok(())
}
