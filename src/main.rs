use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use room_server::{config::Config, routes, state::RoomRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(?config, "starting room server");
    if let Some(dir) = &config.storage_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let rooms  = Arc::new(RoomRegistry::with_rooms(config.seed_rooms.clone()));
    let cancel = CancellationToken::new();
    let running = routes::start(config, rooms, cancel.clone()).await?;
    tracing::info!(tcp = %running.tcp_addr, udp = %running.udp_addr, "ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    for t in running.tasks {
        t.await.ok();
    }
    Ok(())
}
