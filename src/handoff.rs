use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::app_dirs;
use crate::error::{Result, TaisoError};

/// Durable record of what launched the current mode, written before
/// switching screens so the context survives a restart. Mirrors the
/// `taiso_trigger_*` and media slots the chat screen fills in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TriggerHandoff {
    /// The text that triggered the switch, or a marker like "voice" or
    /// "link_click".
    pub trigger_text: String,
    pub trigger_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_names: Vec<String>,
}

pub const VOICE_TRIGGER: &str = "voice";
pub const LINK_CLICK_TRIGGER: &str = "link_click";

impl TriggerHandoff {
    pub fn now(trigger_text: &str) -> Self {
        TriggerHandoff {
            trigger_text: trigger_text.to_string(),
            trigger_time: Some(Local::now()),
            media_urls: Vec::new(),
            media_names: Vec::new(),
        }
    }

    pub fn default_path() -> PathBuf {
        app_dirs::handoff_path().unwrap_or_else(|| PathBuf::from("taiso_handoff.json"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaisoError::DataFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.json");

        let mut handoff = TriggerHandoff::now("体操したい");
        handoff.media_urls = vec!["file:a.mp4".into(), "file:b.mp4".into()];
        handoff.media_names = vec!["第一".into(), "第二".into()];
        handoff.save(&path).unwrap();

        let back = TriggerHandoff::load(&path).unwrap();
        assert_eq!(back, handoff);
    }

    #[test]
    fn missing_slots_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.json");
        std::fs::write(&path, r#"{"trigger_text":"voice","trigger_time":null}"#).unwrap();

        let handoff = TriggerHandoff::load(&path).unwrap();
        assert_eq!(handoff.trigger_text, VOICE_TRIGGER);
        assert!(handoff.media_urls.is_empty());
    }

    #[test]
    fn load_of_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TriggerHandoff::load(&dir.path().join("nope.json")).is_err());
    }
}
