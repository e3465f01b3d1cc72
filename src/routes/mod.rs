use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{config::Config, state::RoomRegistry, utils::clean};

pub mod session;
pub mod tcp;
pub mod udp;
pub mod upload;

/// Both services bound and running.
pub struct Running {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub registry: Arc<RoomRegistry>,
    pub presence: Arc<udp::Presence>,
    pub tasks:    Vec<JoinHandle<()>>,
}

/// Bind both sockets and spawn the TCP loop, the UDP loop and the sweeper.
/// The registry is passed in so the caller owns it.
pub async fn start(
    config: Config,
    registry: Arc<RoomRegistry>,
    cancel: CancellationToken,
) -> std::io::Result<Running> {
    let config = Arc::new(config);

    let listener = TcpListener::bind(config.tcp_bind_address).await?;
    let socket = Arc::new(UdpSocket::bind(config.udp_bind_address).await?);
    let tcp_addr = listener.local_addr()?;
    let udp_addr = socket.local_addr()?;

    let presence = Arc::new(udp::Presence::new(config.heartbeat_timeout));
    let ctx = session::Ctx::new(registry.clone(), config.clone());

    let mut tasks = Vec::with_capacity(3);
    let c = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = tcp::serve(listener, ctx, c).await {
            tracing::error!(error = %e, "TCP service failed");
        }
    }));

    let (p, s, c) = (presence.clone(), socket.clone(), cancel.clone());
    let max_datagram = config.max_datagram_bytes;
    tasks.push(tokio::spawn(async move {
        if let Err(e) = udp::serve(s, p, max_datagram, c).await {
            tracing::error!(error = %e, "UDP service failed");
        }
    }));

    tasks.push(tokio::spawn(clean::task(
        presence.clone(),
        socket,
        config.sweep_interval,
        cancel,
    )));

    Ok(Running { tcp_addr, udp_addr, registry, presence, tasks })
}
