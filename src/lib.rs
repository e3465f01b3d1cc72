//! Multi-room file sharing server.
//!
//! Two independent services share one [`state::RoomRegistry`] by name only:
//! a length-framed TCP service for room and file commands, and a UDP service
//! for best-effort presence, chat and file-activity notifications.

pub mod codec;
pub mod config;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod utils {
    pub mod clean;
    pub mod filename;
    pub mod spool;
}
