use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub user_id: String,
    /// Coach server base url. None means fully offline.
    pub server_url: Option<String>,
    /// Voice relay WebSocket url. None disables the relay.
    pub control_url: Option<String>,
    /// Grade locally even when a server url is configured.
    pub offline: bool,
    /// Custom routine file; the embedded standard routine otherwise.
    pub routine_path: Option<PathBuf>,
    /// Reference profile for local grading.
    pub reference_path: Option<PathBuf>,
    /// Pace for replaying a recorded landmark feed.
    pub detector_fps: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: "guest".to_string(),
            server_url: None,
            control_url: None,
            offline: false,
            routine_path: None,
            reference_path: None,
            detector_fps: None,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "taiso") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("taiso_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            user_id: "alice".into(),
            server_url: Some("http://localhost:8000".into()),
            control_url: Some("ws://localhost:8001".into()),
            offline: true,
            routine_path: Some(PathBuf::from("/tmp/routine.json")),
            reference_path: Some(PathBuf::from("/tmp/profile.json")),
            detector_fps: Some(30.0),
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn unreadable_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ broken").unwrap();
        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());
    }
}
