use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::{Config, JoinPolicy},
    error::{AppErr, AppResult},
    protocol::{Payload, Reply, TcpRequest},
    state::{RoomRegistry, SessionId},
    utils::{filename, spool::Spool},
};

/// One per open TCP connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id:       SessionId,
    pub username: Option<String>,
    pub room:     Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), username: None, room: None }
    }

    /// Name recorded as member and uploader.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| format!("client_{}", self.id.simple()))
    }

    pub(crate) fn current_room(&self) -> AppResult<&str> {
        self.room.as_deref().ok_or(AppErr::NotInRoom)
    }
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}

/// Everything a TCP handler needs. Cheap to clone into each connection task.
#[derive(Clone)]
pub struct Ctx {
    pub registry: Arc<RoomRegistry>,
    pub config:   Arc<Config>,
    pub spool:    Option<Spool>,
}

impl Ctx {
    pub fn new(registry: Arc<RoomRegistry>, config: Arc<Config>) -> Self {
        let spool = config.storage_dir.clone().map(Spool::new);
        Self { registry, config, spool }
    }

    /// Run one request against the session. Errors become error replies.
    pub async fn handle(&self, session: &mut Session, req: TcpRequest) -> Reply {
        let kind = req.kind();
        match self.dispatch(session, req).await {
            Ok(reply) => reply,
            Err(e) => {
                if let AppErr::Io(err) = &e {
                    tracing::error!(session = %session.id, error = %err, "storage failure");
                } else {
                    debug!(session = %session.id, kind, error = %e, "request failed");
                }
                Reply::err(kind, &e)
            }
        }
    }

    async fn dispatch(&self, session: &mut Session, req: TcpRequest) -> AppResult<Reply> {
        let kind = req.kind();
        match req {
            TcpRequest::SetUsername { username } => Ok(Self::set_username(session, username)),
            TcpRequest::CreateRoom { room } => {
                filename::validate_room(&room)?;
                self.registry.create_room(&room).await?;
                Ok(Reply::ok(kind, Payload::None {}).with_message(format!("Room {room} created")))
            }
            TcpRequest::JoinRoom { room } => self.join_room(session, room).await,
            TcpRequest::ListRooms {} => {
                let rooms = self.registry.list_rooms().await;
                Ok(Reply::ok(kind, Payload::Rooms { rooms }))
            }
            TcpRequest::ListFiles {} => {
                let files = self.registry.list_files(session.current_room()?).await?;
                Ok(Reply::ok(kind, Payload::Files { files }))
            }
            TcpRequest::UploadFile { filename, size, data } => {
                super::upload::upload_file(self, session, filename, size, data).await
            }
            TcpRequest::DownloadFile { filename } => {
                super::upload::download_file(self, session, filename).await
            }
        }
    }

    /// Session-only; the name a room shows is the one held at join time.
    fn set_username(session: &mut Session, username: String) -> Reply {
        // blank clears back to the session fallback name
        let username = username.trim();
        session.username = (!username.is_empty()).then(|| username.to_string());
        Reply::ok("set_username", Payload::None {}).with_message("Username set")
    }

    async fn join_room(&self, session: &mut Session, room: String) -> AppResult<Reply> {
        filename::validate_room(&room)?;
        match self.config.join_policy {
            JoinPolicy::CreateOnJoin => {
                if self.registry.get_or_create_room(&room).await {
                    debug!(room = %room, "room created on join");
                }
            }
            JoinPolicy::RequireExisting => {
                if !self.registry.contains(&room).await {
                    return Err(AppErr::NotFound(format!("Room {room}")));
                }
            }
        }

        let snap = self.registry.add_member(&room, session.id, &session.display_name()).await?;
        if let Some(prev) = session.room.replace(room.clone()) {
            if prev != room {
                self.registry.remove_member(&prev, session.id).await;
            }
        }

        Ok(Reply::ok(
            "join_room",
            Payload::Joined {
                room_files: snap.files.iter().map(|f| f.name.clone()).collect(),
                room:       snap.name,
                files:      snap.files,
                members:    snap.members,
            },
        )
        .with_message(format!("Joined room {room}")))
    }

    /// Connection gone: drop the session's membership.
    pub async fn teardown(&self, session: &Session) {
        if let Some(room) = &session.room {
            self.registry.remove_member(room, session.id).await;
        }
    }
}
