use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::UdpSocket, sync::RwLock, time::Instant};
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    presence::{PresenceTable, UdpClient},
    protocol::{self, timestamp, UdpEvent, UdpRequest},
};

/// An event addressed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to:    SocketAddr,
    pub event: UdpEvent,
}

pub struct Presence {
    table: RwLock<PresenceTable>,
}

impl Presence {
    pub fn new(timeout: Duration) -> Self {
        Self { table: RwLock::new(PresenceTable::new(timeout)) }
    }

    /// Live usernames in `room`.
    pub async fn users(&self, room: &str) -> Vec<String> {
        self.table.read().await.users(room, Instant::now())
    }

    pub async fn client(&self, key: &SocketAddr) -> Option<UdpClient> {
        self.table.read().await.get(key).cloned()
    }

    /// Apply one request from `src` and return what must be sent.
    pub async fn handle(&self, src: SocketAddr, req: UdpRequest, now: Instant) -> Vec<Outbound> {
        let mut t = self.table.write().await;
        let mut out = Vec::new();

        match req {
            UdpRequest::Register { username, room, udp_port } => {
                register(&mut t, &mut out, src, username, room, udp_port, now);
            }
            UdpRequest::Heartbeat { username, room, udp_port } => {
                if !t.touch(&src, now) {
                    // server may have restarted; never refuse a heartbeat
                    debug!(%src, "heartbeat from unknown sender, registering");
                    let username = username.unwrap_or_else(|| "Anonymous".into());
                    let room = room.unwrap_or_else(|| crate::config::DEFAULT_SEED_ROOM.into());
                    register(&mut t, &mut out, src, username, room, udp_port, now);
                }
            }
            UdpRequest::Unregister {} => {
                if let Some(gone) = t.remove(&src) {
                    info!(%src, user = %gone.username, room = %gone.room, "client unregistered");
                    left(&t, &mut out, &gone.username, &gone.room, now);
                }
            }
            UdpRequest::JoinRoom { room } => {
                let Some(old) = t.join(&src, room.clone(), now) else {
                    debug!(%src, "join_room from unregistered sender dropped");
                    return out;
                };
                let Some(me) = t.get(&src).cloned() else { return out };
                if old != room {
                    left(&t, &mut out, &me.username, &old, now);
                    joined(&t, &mut out, &me.username, &room, now);
                }
                out.push(room_info(&t, me.reply_to, &room, now));
            }
            UdpRequest::FileNotification { action, filename, mut extra } => {
                let Some(me) = t.get(&src).cloned() else {
                    debug!(%src, "file_notification from unregistered sender dropped");
                    return out;
                };
                // server-stamped fields win over anything the client sent
                extra.retain(|k, _| !STAMPED.contains(&k.as_str()));
                let event = UdpEvent::Notification {
                    message:   file_message(&me.username, action.as_deref(), filename.as_deref()),
                    room:      me.room.clone(),
                    username:  me.username.clone(),
                    action,
                    filename,
                    users:     t.users(&me.room, now),
                    timestamp: timestamp(),
                    extra,
                };
                fan_out(&t, &mut out, &me.room, Some(&src), event, now);
            }
            UdpRequest::ChatMessage { message } => {
                let Some(me) = t.get(&src).cloned() else {
                    debug!(%src, "chat_message from unregistered sender dropped");
                    return out;
                };
                let event = UdpEvent::Chat {
                    room:      me.room.clone(),
                    username:  me.username,
                    message,
                    timestamp: timestamp(),
                };
                fan_out(&t, &mut out, &me.room, Some(&src), event, now);
            }
        }
        out
    }

    /// Evict stale clients; returns the "left" notices for their rooms.
    pub async fn sweep(&self, now: Instant) -> (Vec<UdpClient>, Vec<Outbound>) {
        let mut t = self.table.write().await;
        let gone = t.sweep(now);
        let mut out = Vec::new();
        for c in &gone {
            left(&t, &mut out, &c.username, &c.room, now);
        }
        (gone, out)
    }
}

fn register(
    t: &mut PresenceTable,
    out: &mut Vec<Outbound>,
    src: SocketAddr,
    username: String,
    room: String,
    udp_port: Option<u16>,
    now: Instant,
) {
    let reply_to = udp_port.map_or(src, |p| SocketAddr::new(src.ip(), p));
    let prev = t.register(src, reply_to, username.clone(), room.clone(), now);
    info!(%src, %reply_to, user = %username, room = %room, "client registered");

    if let Some(prev) = prev.filter(|p| p.room != room) {
        left(t, out, &prev.username, &prev.room, now);
    }
    joined(t, out, &username, &room, now);
    out.push(room_info(t, reply_to, &room, now));
}

fn room_info(t: &PresenceTable, to: SocketAddr, room: &str, now: Instant) -> Outbound {
    Outbound {
        to,
        event: UdpEvent::RoomInfo {
            room:      room.to_string(),
            users:     t.users(room, now),
            timestamp: timestamp(),
        },
    }
}

fn presence_notice(t: &PresenceTable, who: &str, room: &str, verb: &str, now: Instant) -> UdpEvent {
    UdpEvent::Notification {
        room:      room.to_string(),
        username:  who.to_string(),
        message:   format!("{who} {verb} the room"),
        action:    None,
        filename:  None,
        users:     t.users(room, now),
        timestamp: timestamp(),
        extra:     Map::new(),
    }
}

/// Goes to everyone in the room, the newcomer included.
fn joined(t: &PresenceTable, out: &mut Vec<Outbound>, who: &str, room: &str, now: Instant) {
    let ev = presence_notice(t, who, room, "joined", now);
    fan_out(t, out, room, None, ev, now);
}

fn left(t: &PresenceTable, out: &mut Vec<Outbound>, who: &str, room: &str, now: Instant) {
    let ev = presence_notice(t, who, room, "left", now);
    fan_out(t, out, room, None, ev, now);
}

fn fan_out(
    t: &PresenceTable,
    out: &mut Vec<Outbound>,
    room: &str,
    exclude: Option<&SocketAddr>,
    event: UdpEvent,
    now: Instant,
) {
    out.extend(
        t.recipients(room, exclude, now)
            .into_iter()
            .map(|to| Outbound { to, event: event.clone() }),
    );
}

const STAMPED: &[&str] = &["type", "room", "username", "message", "users", "timestamp"];

fn file_message(user: &str, action: Option<&str>, filename: Option<&str>) -> String {
    let verb = action.map_or_else(|| "shared".to_string(), past_tense);
    format!("{user} {verb} {}", filename.unwrap_or("a file"))
}

fn past_tense(action: &str) -> String {
    if action.ends_with("ed") {
        action.to_string()
    } else if action.ends_with('e') {
        format!("{action}d")
    } else {
        format!("{action}ed")
    }
}

/// Best effort: a failed send is logged and forgotten.
pub async fn deliver(socket: &UdpSocket, out: Vec<Outbound>) {
    for Outbound { to, event } in out {
        let bytes = match event.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "event serialization failed");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&bytes, to).await {
            debug!(%to, error = %e, "send failed");
        }
    }
}

/// Receive loop. Never exits on a bad datagram.
pub async fn serve(
    socket: Arc<UdpSocket>,
    presence: Arc<Presence>,
    max_datagram: usize,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %socket.local_addr()?, "UDP notification service listening");
    // one spare byte tells an oversized datagram from an exact fit
    let mut buf = vec![0u8; max_datagram + 1];

    loop {
        let (len, src) = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => match r {
                Ok(pair) => pair,
                Err(e) => {
                    // e.g. ICMP port unreachable bounced back on some platforms
                    debug!(error = %e, "recv failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            },
        };

        if len > max_datagram {
            warn!(%src, limit = max_datagram, "oversized datagram dropped");
            continue;
        }
        let Some(data) = buf.get(..len) else { continue };
        let req = match protocol::decode_datagram(data) {
            Ok(r) => r,
            Err(e) => {
                debug!(%src, error = %e, "malformed datagram dropped");
                continue;
            }
        };
        trace!(%src, ?req, "datagram");

        let out = presence.handle(src, req, Instant::now()).await;
        deliver(&socket, out).await;
    }

    info!("UDP notification service stopped");
    Ok(())
}
