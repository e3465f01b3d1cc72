use crate::config::Extensions;
use crate::error::{bad, AppResult};

const BLOCKED: &[&str] = &["..", "\\", "/", ":", "*", "?", "\"", "<", ">", "|"];
const MAX_FILENAME: usize = 255;
const MAX_ROOM_NAME: usize = 64;

fn check_common(name: &str, what: &str, max: usize) -> AppResult<()> {
    if name.is_empty() || name.trim() != name {
        return Err(bad(format!("Invalid {what}")));
    }
    if let Some(p) = BLOCKED.iter().find(|p| name.contains(**p)) {
        return Err(bad(format!("{what} contains invalid character: {p}")));
    }
    // on-disk limit is in bytes, not characters
    if name.len() > max {
        return Err(bad(format!("{what} too long (max {max} bytes)")));
    }
    Ok(())
}

/// Room names double as spool directory names.
pub fn validate_room(name: &str) -> AppResult<()> {
    check_common(name, "room name", MAX_ROOM_NAME)
}

pub fn validate_file(name: &str, allowed: &Extensions) -> AppResult<()> {
    check_common(name, "filename", MAX_FILENAME)?;
    let ext = extension(name);
    if !allowed.permits(&ext) {
        let shown = if ext.is_empty() { "(none)" } else { ext.as_str() };
        return Err(bad(format!("File type {shown} not allowed")));
    }
    Ok(())
}

/// Lower-cased extension with its dot, `""` when there is none.
fn extension(name: &str) -> String {
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => name[i..].to_ascii_lowercase(),
    }
}
