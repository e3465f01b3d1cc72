use serde::Serialize;
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

/// Wire-level error codes carried in the `error` field of a TCP reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    AlreadyExists,
    NotFound,
    NotInRoom,
    PayloadTooLarge,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Room {0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Payload too large ({size} bytes, max {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl AppErr {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppErr::Bad(_)           => ErrorCode::BadRequest,
            AppErr::AlreadyExists(_) => ErrorCode::AlreadyExists,
            AppErr::NotFound(_)      => ErrorCode::NotFound,
            AppErr::NotInRoom        => ErrorCode::NotInRoom,
            AppErr::TooLarge { .. }  => ErrorCode::PayloadTooLarge,
            AppErr::Io(_)            => ErrorCode::Internal,
        }
    }

    /// Text sent to the client. Storage failures stay generic; details go to the log.
    pub fn client_message(&self) -> String {
        match self {
            AppErr::Io(_) => "Storage failure".into(),
            other         => other.to_string(),
        }
    }
}

/* ── 小助手：把任何 error 轉成 Bad / Io ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }

pub fn io<E: Into<std::io::Error>>(e: E) -> AppErr {
    AppErr::Io(e.into())
}
