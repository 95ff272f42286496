use directories::ProjectDirs;
use std::path::PathBuf;

/// State directory for history, logs and handoff records, preferring the
/// XDG-style `~/.local/state/taiso` with a platform fallback.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        Some(
            PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("taiso"),
        )
    } else {
        ProjectDirs::from("", "", "taiso").map(|dirs| dirs.data_local_dir().to_path_buf())
    }
}

pub fn db_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("history.db"))
}

pub fn log_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("taiso.log"))
}

pub fn handoff_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("handoff.json"))
}

pub fn session_log_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("sessions.csv"))
}
