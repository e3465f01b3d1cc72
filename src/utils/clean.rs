use std::{sync::Arc, time::Duration};
use tokio::{net::UdpSocket, time};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::routes::udp::{deliver, Presence};

/// Heartbeat sweeper: every `every`, evict UDP clients whose heartbeat is stale
/// and tell their rooms they left.
pub async fn task(
    presence: Arc<Presence>,
    socket: Arc<UdpSocket>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut tick = time::interval(every);
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let (gone, notices) = presence.sweep(time::Instant::now()).await;
        if gone.is_empty() { continue; }

        for c in &gone {
            info!(user = %c.username, room = %c.room, reply_to = %c.reply_to, "client expired");
        }
        deliver(&socket, notices).await;
    }
    info!("heartbeat sweeper stopped");
}
