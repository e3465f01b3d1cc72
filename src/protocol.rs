use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppErr, ErrorCode};
use crate::state::FileMeta;

/* ------------ TCP ------------ */

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TcpRequest {
    SetUsername {
        username: String,
    },
    CreateRoom {
        #[serde(alias = "name")]
        room: String,
    },
    JoinRoom {
        #[serde(alias = "name")]
        room: String,
    },
    ListRooms {},
    ListFiles {},
    UploadFile {
        #[serde(alias = "name")]
        filename: String,
        #[serde(default)]
        size: Option<usize>,
        #[serde(alias = "bytes")]
        data: String,
    },
    DownloadFile {
        #[serde(alias = "name")]
        filename: String,
    },
}

impl TcpRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            TcpRequest::SetUsername { .. }  => "set_username",
            TcpRequest::CreateRoom { .. }   => "create_room",
            TcpRequest::JoinRoom { .. }     => "join_room",
            TcpRequest::ListRooms {}        => "list_rooms",
            TcpRequest::ListFiles {}        => "list_files",
            TcpRequest::UploadFile { .. }   => "upload_file",
            TcpRequest::DownloadFile { .. } => "download_file",
        }
    }
}

/// Only the tag, for echoing it back when the full request fails to decode.
#[derive(Deserialize)]
struct TagOnly {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Tag used in replies that cannot be tied to a request.
pub const UNKNOWN_KIND: &str = "error";

/// Decode one frame. On failure returns the tag to echo plus the error.
pub fn decode_request(frame: &[u8]) -> Result<TcpRequest, (String, AppErr)> {
    serde_json::from_slice(frame).map_err(|e| {
        let kind = serde_json::from_slice::<TagOnly>(frame)
            .ok()
            .and_then(|t| t.kind)
            .unwrap_or_else(|| UNKNOWN_KIND.to_string());
        let err = if e.is_syntax() || e.is_eof() {
            AppErr::Bad("Invalid JSON format".into())
        } else if e.to_string().starts_with("unknown variant") {
            AppErr::Bad("Unknown message type".into())
        } else {
            AppErr::Bad(e.to_string())
        };
        (kind, err)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    None {},
    Rooms {
        rooms: Vec<String>,
    },
    Joined {
        room:       String,
        room_files: Vec<String>,
        files:      Vec<FileMeta>,
        members:    Vec<String>,
    },
    Files {
        files: Vec<FileMeta>,
    },
    Uploaded {
        filename: String,
        size:     usize,
    },
    Download {
        filename:    String,
        size:        usize,
        data:        String,
        uploaded_by: String,
        uploaded_at: chrono::DateTime<chrono::Utc>,
    },
}

/// One TCP response frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    #[serde(rename = "type")]
    pub kind:    String,
    pub status:  Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:   Option<ErrorCode>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Reply {
    pub fn ok(kind: impl Into<String>, payload: Payload) -> Self {
        Reply { kind: kind.into(), status: Status::Success, message: None, error: None, payload }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn err(kind: impl Into<String>, e: &AppErr) -> Self {
        Reply {
            kind:    kind.into(),
            status:  Status::Error,
            message: Some(e.client_message()),
            error:   Some(e.code()),
            payload: Payload::None {},
        }
    }

    pub fn is_ok(&self) -> bool { self.status == Status::Success }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/* ------------ UDP ------------ */

fn anonymous() -> String { "Anonymous".into() }
fn general() -> String { crate::config::DEFAULT_SEED_ROOM.into() }

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdpRequest {
    Register {
        #[serde(default = "anonymous")]
        username: String,
        #[serde(default = "general")]
        room:     String,
        #[serde(default)]
        udp_port: Option<u16>,
    },
    Heartbeat {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        room:     Option<String>,
        #[serde(default)]
        udp_port: Option<u16>,
    },
    Unregister {},
    JoinRoom {
        room: String,
    },
    /// Client-defined; unknown fields ride along in `extra`.
    FileNotification {
        #[serde(default)]
        action:   Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(flatten)]
        extra:    Map<String, Value>,
    },
    ChatMessage {
        #[serde(alias = "text")]
        message: String,
    },
}

pub fn decode_datagram(buf: &[u8]) -> serde_json::Result<UdpRequest> {
    serde_json::from_slice(buf)
}

/// Events pushed to UDP clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdpEvent {
    RoomInfo {
        room:      String,
        users:     Vec<String>,
        timestamp: String,
    },
    Notification {
        room:      String,
        username:  String,
        message:   String,
        #[serde(skip_serializing_if = "Option::is_none")]
        action:    Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename:  Option<String>,
        users:     Vec<String>,
        timestamp: String,
        #[serde(flatten)]
        extra:     Map<String, Value>,
    },
    Chat {
        room:      String,
        username:  String,
        message:   String,
        timestamp: String,
    },
}

impl UdpEvent {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
