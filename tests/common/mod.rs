//! Loopback harness: spawns both services on ephemeral ports.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use room_server::{
    codec::{FrameCodec, Inbound},
    config::Config,
    routes::{self, Running},
    state::RoomRegistry,
};
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::{codec::Framed, sync::CancellationToken};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub running: Running,
    cancel:      CancellationToken,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(&[]).await
    }

    pub async fn spawn_with(extra: &[(&str, &str)]) -> Self {
        let mut vars = HashMap::from([
            ("TCP_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("UDP_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = Config::from_vars(&vars).expect("test config");
        let registry = Arc::new(RoomRegistry::with_rooms(config.seed_rooms.clone()));
        let cancel = CancellationToken::new();
        let running = routes::start(config, registry, cancel.clone()).await.expect("start");
        Self { running, cancel }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.running.registry
    }

    pub async fn tcp(&self) -> TcpClient {
        TcpClient::connect(self.running.tcp_addr).await
    }

    pub async fn udp(&self) -> UdpClient {
        UdpClient::bind(self.running.udp_addr).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct TcpClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TcpClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { framed: Framed::new(stream, FrameCodec::new(usize::MAX)) }
    }

    /// Hands back the socket for writing malformed bytes.
    pub fn into_stream(self) -> TcpStream {
        self.framed.into_inner()
    }

    pub async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.framed.send(Bytes::from(bytes)).await.expect("send");
    }

    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("reply timed out")
            .expect("connection closed")
            .expect("read error");
        match frame {
            Inbound::Frame(buf) => serde_json::from_slice(&buf).expect("reply json"),
            Inbound::Oversized(n) => panic!("unexpected oversized reply {n}"),
        }
    }

    pub async fn request(&mut self, msg: Value) -> Value {
        self.send_raw(serde_json::to_vec(&msg).unwrap()).await;
        self.recv().await
    }

    pub async fn login(&mut self, user: &str, room: &str) {
        let r = self.request(json!({"type": "set_username", "username": user})).await;
        assert_eq!(r["status"], "success");
        let r = self.request(json!({"type": "join_room", "room": room})).await;
        assert_eq!(r["status"], "success", "{r}");
    }

    pub async fn upload(&mut self, name: &str, body: &[u8]) -> Value {
        self.request(json!({
            "type": "upload_file",
            "filename": name,
            "size": body.len(),
            "data": BASE64.encode(body),
        }))
        .await
    }

    pub async fn download(&mut self, name: &str) -> Value {
        self.request(json!({"type": "download_file", "filename": name})).await
    }
}

pub fn decode_data(reply: &Value) -> Vec<u8> {
    BASE64.decode(reply["data"].as_str().expect("data field")).expect("base64")
}

pub struct UdpClient {
    pub socket: UdpSocket,
    server:     SocketAddr,
}

impl UdpClient {
    pub async fn bind(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind udp");
        Self { socket, server }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub async fn send(&self, msg: Value) {
        self.send_raw(&serde_json::to_vec(&msg).unwrap()).await;
    }

    pub async fn send_raw(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.server).await.expect("send_to");
    }

    pub async fn recv(&self) -> Value {
        self.try_recv(WAIT).await.expect("datagram timed out")
    }

    pub async fn try_recv(&self, wait: Duration) -> Option<Value> {
        let mut buf = vec![0u8; 65_536];
        let (n, _) = tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
        Some(serde_json::from_slice(&buf[..n]).expect("event json"))
    }

    /// Wait for an event of `kind`, skipping others.
    pub async fn recv_kind(&self, kind: &str) -> Value {
        loop {
            let v = self.recv().await;
            if v["type"] == kind {
                return v;
            }
        }
    }

    /// Register and consume the join notice and room_info.
    pub async fn register(&self, user: &str, room: &str) {
        self.send(json!({"type": "register", "username": user, "room": room})).await;
        self.recv_kind("room_info").await;
    }

    pub async fn drain(&self) {
        while self.try_recv(Duration::from_millis(100)).await.is_some() {}
    }
}
