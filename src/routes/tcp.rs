use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Semaphore,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, info, warn};

use super::session::{Ctx, Session};
use crate::{
    codec::{FrameCodec, Inbound},
    error::AppErr,
    protocol::{self, Reply, UNKNOWN_KIND},
};

/// Accept connections until `cancel` fires. Each connection gets its own task;
/// past `max_connections` new sockets are closed straight away.
pub async fn serve(listener: TcpListener, ctx: Ctx, cancel: CancellationToken) -> std::io::Result<()> {
    let limit = Arc::new(Semaphore::new(ctx.config.max_connections));
    info!(addr = %listener.local_addr()?, max_connections = ctx.config.max_connections, "TCP file service listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // accept errors (EMFILE etc.) are per-attempt
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let Ok(permit) = limit.clone().try_acquire_owned() else {
            warn!(%peer, "connection limit reached, rejecting");
            drop(stream);
            continue;
        };

        let ctx = ctx.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            connection(stream, peer, ctx, cancel).await;
            drop(permit);
        });
    }

    info!("TCP file service stopped");
    Ok(())
}

async fn connection(stream: TcpStream, peer: SocketAddr, ctx: Ctx, cancel: CancellationToken) {
    let mut session = Session::new();
    info!(%peer, session = %session.id, "client connected");

    let mut framed = Framed::new(stream, FrameCodec::new(ctx.config.max_frame_bytes));
    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => next,
        };
        let reply = match inbound {
            None => break,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
            Some(Ok(Inbound::Oversized(size))) => {
                let e = AppErr::TooLarge { size, limit: ctx.config.max_frame_bytes };
                warn!(%peer, size, "oversized frame discarded");
                Reply::err(UNKNOWN_KIND, &e)
            }
            Some(Ok(Inbound::Frame(buf))) => match protocol::decode_request(&buf) {
                Ok(req) => ctx.handle(&mut session, req).await,
                Err((kind, e)) => {
                    debug!(%peer, error = %e, "undecodable request");
                    Reply::err(kind, &e)
                }
            },
        };

        let bytes = match reply.to_bytes() {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                tracing::error!(%peer, error = %e, "reply serialization failed");
                break;
            }
        };
        if let Err(e) = framed.send(bytes).await {
            debug!(%peer, error = %e, "write failed");
            break;
        }
    }

    ctx.teardown(&session).await;
    info!(%peer, session = %session.id, user = %session.display_name(), "client disconnected");
}
