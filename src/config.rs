// 伺服器設定：全部從環境變數讀（`.env` 由 main 載入）

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TCP_BIND_ADDRESS: &str = "127.0.0.1:65432";
pub const DEFAULT_UDP_BIND_ADDRESS: &str = "127.0.0.1:65433";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_MAX_DATAGRAM_BYTES: usize = 4096;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_SEED_ROOM: &str = "general";

/// Slack on top of the encoded upload for the JSON envelope.
const FRAME_ENVELOPE_SLACK: usize = 64 * 1024;

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".pdf", ".doc", ".docx", ".xls", ".xlsx",
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".svg",
    ".mp4", ".avi", ".mov", ".mp3", ".wav",
    ".zip", ".rar", ".7z", ".tar", ".gz",
    ".py", ".js", ".html", ".css", ".json", ".xml",
];

/// What `join_room` does when the room does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Create the room and join it.
    CreateOnJoin,
    /// Fail with `NotFound`.
    RequireExisting,
}

impl FromStr for JoinPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(JoinPolicy::CreateOnJoin),
            "existing" => Ok(JoinPolicy::RequireExisting),
            other => Err(ConfigError::Invalid(format!(
                "JOIN_POLICY must be 'create' or 'existing', got '{other}'"
            ))),
        }
    }
}

/// File extensions accepted on upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extensions {
    Any,
    Only(Vec<String>),
}

impl Extensions {
    pub fn permits(&self, ext: &str) -> bool {
        match self {
            Extensions::Any => true,
            Extensions::Only(list) => list.iter().any(|e| e == ext),
        }
    }
}

impl Default for Extensions {
    fn default() -> Self {
        Extensions::Only(DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the reliable (TCP) service.
    pub tcp_bind_address: SocketAddr,

    /// Listen address for the presence (UDP) service.
    pub udp_bind_address: SocketAddr,

    /// Upper bound on concurrent TCP sessions.
    pub max_connections: usize,

    /// Largest decoded file accepted by `upload_file`.
    pub max_upload_bytes: usize,

    /// Largest TCP frame (JSON envelope, base64 body included).
    pub max_frame_bytes: usize,

    /// Largest datagram processed by the presence service.
    pub max_datagram_bytes: usize,

    /// A UDP client silent for longer than this is evicted.
    pub heartbeat_timeout: Duration,

    /// Period of the eviction sweep.
    pub sweep_interval: Duration,

    pub join_policy: JoinPolicy,

    /// Rooms present at startup.
    pub seed_rooms: Vec<String>,

    /// When set, uploads are also written to `<dir>/<room>/<filename>`.
    pub storage_dir: Option<PathBuf>,

    pub allowed_extensions: Extensions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Base64 length of `n` bytes plus room for the rest of the message.
pub fn frame_limit_for(max_upload_bytes: usize) -> usize {
    max_upload_bytes.div_ceil(3) * 4 + FRAME_ENVELOPE_SLACK
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Same as `from_env`, over an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let tcp_bind_address = parse_addr(vars, "TCP_BIND_ADDRESS", DEFAULT_TCP_BIND_ADDRESS)?;
        let udp_bind_address = parse_addr(vars, "UDP_BIND_ADDRESS", DEFAULT_UDP_BIND_ADDRESS)?;

        let max_connections = parse_positive(vars, "MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let max_upload_bytes = parse_positive(vars, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let max_frame_bytes =
            parse_positive(vars, "MAX_FRAME_BYTES", frame_limit_for(max_upload_bytes))?;
        let max_datagram_bytes =
            parse_positive(vars, "MAX_DATAGRAM_BYTES", DEFAULT_MAX_DATAGRAM_BYTES)?;

        // u32 length prefix on the wire
        if max_frame_bytes > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "MAX_FRAME_BYTES must fit in 32 bits, got {max_frame_bytes}"
            )));
        }
        if max_datagram_bytes > 65_507 {
            return Err(ConfigError::Invalid(format!(
                "MAX_DATAGRAM_BYTES must not exceed 65507, got {max_datagram_bytes}"
            )));
        }

        let heartbeat_timeout = Duration::from_secs(parse_positive(
            vars,
            "HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?);
        let sweep_interval = Duration::from_secs(parse_positive(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?);

        let join_policy = match vars.get("JOIN_POLICY") {
            Some(v) => v.parse()?,
            None => JoinPolicy::CreateOnJoin,
        };

        let seed_rooms = match vars.get("SEED_ROOMS") {
            Some(v) => split_list(v),
            None => vec![DEFAULT_SEED_ROOM.to_string()],
        };

        let storage_dir = vars
            .get("STORAGE_DIR")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let allowed_extensions = match vars.get("ALLOWED_EXTENSIONS").map(|s| s.trim()) {
            Some("*") => Extensions::Any,
            Some(v) => Extensions::Only(
                split_list(v)
                    .into_iter()
                    .map(|e| {
                        let e = e.to_ascii_lowercase();
                        if e.starts_with('.') { e } else { format!(".{e}") }
                    })
                    .collect(),
            ),
            None => Extensions::default(),
        };

        Ok(Config {
            tcp_bind_address,
            udp_bind_address,
            max_connections,
            max_upload_bytes,
            max_frame_bytes,
            max_datagram_bytes,
            heartbeat_timeout,
            sweep_interval,
            join_policy,
            seed_rooms,
            storage_dir,
            allowed_extensions,
        })
    }
}

fn parse_addr(
    vars: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<SocketAddr, ConfigError> {
    let raw = vars.get(key).map(String::as_str).unwrap_or(default);
    raw.parse().map_err(|e| {
        ConfigError::Invalid(format!("{key} must be a socket address, got '{raw}': {e}"))
    })
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|e| {
        ConfigError::Invalid(format!("{key} must be a positive integer, got '{raw}': {e}"))
    })?;
    if value == T::default() {
        return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
    }
    Ok(value)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
