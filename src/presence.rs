use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpClient {
    /// Where events for this client are sent.
    pub reply_to:       SocketAddr,
    pub username:       String,
    pub room:           String,
    pub last_heartbeat: Instant,
}

impl UdpClient {
    pub fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) <= timeout
    }
}

/// UDP clients keyed by datagram source address.
#[derive(Debug)]
pub struct PresenceTable {
    clients: HashMap<SocketAddr, UdpClient>,
    timeout: Duration,
}

impl PresenceTable {
    pub fn new(timeout: Duration) -> Self {
        Self { clients: HashMap::new(), timeout }
    }

    pub fn len(&self) -> usize { self.clients.len() }

    pub fn is_empty(&self) -> bool { self.clients.is_empty() }

    pub fn get(&self, key: &SocketAddr) -> Option<&UdpClient> {
        self.clients.get(key)
    }

    /// Create or replace. Returns the replaced entry, if any.
    pub fn register(
        &mut self,
        key: SocketAddr,
        reply_to: SocketAddr,
        username: String,
        room: String,
        now: Instant,
    ) -> Option<UdpClient> {
        self.clients.insert(key, UdpClient { reply_to, username, room, last_heartbeat: now })
    }

    /// Refresh last-seen. `false` if the sender is unknown.
    pub fn touch(&mut self, key: &SocketAddr, now: Instant) -> bool {
        match self.clients.get_mut(key) {
            Some(c) => {
                c.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Move a client to `room`, refreshing it. Returns the previous room.
    pub fn join(&mut self, key: &SocketAddr, room: String, now: Instant) -> Option<String> {
        let c = self.clients.get_mut(key)?;
        c.last_heartbeat = now;
        Some(std::mem::replace(&mut c.room, room))
    }

    pub fn remove(&mut self, key: &SocketAddr) -> Option<UdpClient> {
        self.clients.remove(key)
    }

    /// Reply addresses of live clients in `room`, minus `exclude`.
    pub fn recipients(
        &self,
        room: &str,
        exclude: Option<&SocketAddr>,
        now: Instant,
    ) -> Vec<SocketAddr> {
        self.clients
            .iter()
            .filter(|(k, c)| {
                c.room == room && Some(*k) != exclude && c.is_live(now, self.timeout)
            })
            .map(|(_, c)| c.reply_to)
            .collect()
    }

    /// Sorted, de-duplicated usernames of live clients in `room`.
    pub fn users(&self, room: &str, now: Instant) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .clients
            .values()
            .filter(|c| c.room == room && c.is_live(now, self.timeout))
            .map(|c| &c.username)
            .collect();
        set.into_iter().cloned().collect()
    }

    /// Drop every client whose heartbeat is older than the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<UdpClient> {
        let stale: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, c)| !c.is_live(now, self.timeout))
            .map(|(k, _)| *k)
            .collect();
        stale.iter().filter_map(|k| self.clients.remove(k)).collect()
    }
}
