use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DesiduaError;

pub const API_URL_ENV: &str = "DESIDUA_API_URL";
pub const WS_URL_ENV: &str = "DESIDUA_WS_URL";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub publish_audio_on_join: bool,
    #[serde(default = "default_true")]
    pub publish_video_on_join: bool,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:7880".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            request_timeout_secs: default_timeout_secs(),
            publish_audio_on_join: true,
            publish_video_on_join: true,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Check that both endpoints parse and use the expected schemes.
    pub fn validate(&self) -> Result<(), DesiduaError> {
        let api = url::Url::parse(&self.api_url)
            .map_err(|e| DesiduaError::InvalidInput(format!("api_url '{}': {e}", self.api_url)))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(DesiduaError::InvalidInput(format!(
                "api_url must be http(s), got '{}'",
                self.api_url
            )));
        }
        let ws = url::Url::parse(&self.ws_url)
            .map_err(|e| DesiduaError::InvalidInput(format!("ws_url '{}': {e}", self.ws_url)))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(DesiduaError::InvalidInput(format!(
                "ws_url must be ws(s), got '{}'",
                self.ws_url
            )));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(url) = lookup(WS_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.ws_url = url.trim().to_string();
        }
    }
}

/// Persists [`Config`] as `config.json` inside the host data directory.
pub struct ConfigStore {
    config: Mutex<Config>,
    file_path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: &str) -> Self {
        Self::with_overrides(data_dir, |key| std::env::var(key).ok())
    }

    fn with_overrides(data_dir: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let file_path = PathBuf::from(data_dir).join("config.json");
        let mut config = Self::load(&file_path);
        config.apply_overrides(lookup);
        if let Err(e) = config.validate() {
            tracing::warn!("config invalid, falling back to defaults: {e}");
            config = Config::default();
        }
        Self {
            config: Mutex::new(config),
            file_path,
        }
    }

    pub fn get(&self) -> Config {
        self.config.lock().unwrap().clone()
    }

    pub fn set_api_url(&self, url: String) -> Result<(), DesiduaError> {
        self.update(|c| c.api_url = url)
    }

    pub fn set_ws_url(&self, url: String) -> Result<(), DesiduaError> {
        self.update(|c| c.ws_url = url)
    }

    pub fn set_publish_on_join(&self, audio: bool, video: bool) -> Result<(), DesiduaError> {
        self.update(|c| {
            c.publish_audio_on_join = audio;
            c.publish_video_on_join = video;
        })
    }

    fn update(&self, apply: impl FnOnce(&mut Config)) -> Result<(), DesiduaError> {
        let mut candidate = self.get();
        apply(&mut candidate);
        candidate.validate()?;
        *self.config.lock().unwrap() = candidate;
        self.save();
        Ok(())
    }

    fn save(&self) {
        let config = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize config: {e}"),
        }
    }

    fn load(path: &Path) -> Config {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_no_file() {
        let dir = temp_dir();
        let store = ConfigStore::with_overrides(dir.path().to_str().unwrap(), no_env);
        assert_eq!(store.get(), Config::default());
        assert_eq!(store.get().request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn set_urls_persist() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = ConfigStore::with_overrides(path, no_env);
            store.set_api_url("https://api.clinic.example".into()).unwrap();
            store.set_ws_url("wss://rtc.clinic.example".into()).unwrap();
        }
        let store = ConfigStore::with_overrides(path, no_env);
        assert_eq!(store.get().api_url, "https://api.clinic.example");
        assert_eq!(store.get().ws_url, "wss://rtc.clinic.example");
    }

    #[test]
    fn invalid_url_is_rejected_and_not_saved() {
        let dir = temp_dir();
        let store = ConfigStore::with_overrides(dir.path().to_str().unwrap(), no_env);
        assert!(store.set_ws_url("https://not-a-socket".into()).is_err());
        assert!(store.set_api_url("nonsense".into()).is_err());
        assert_eq!(store.get(), Config::default());
        assert!(!dir.path().join("config.json").exists());
    }

    #[test]
    fn env_overrides_file() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("config.json"),
            r#"{"api_url":"http://file.example"}"#,
        )
        .unwrap();
        let store = ConfigStore::with_overrides(dir.path().to_str().unwrap(), |key| {
            (key == API_URL_ENV).then(|| "https://env.example".to_string())
        });
        assert_eq!(store.get().api_url, "https://env.example");
        assert_eq!(store.get().ws_url, default_ws_url());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("config.json"), "not json!!!").unwrap();
        let store = ConfigStore::with_overrides(dir.path().to_str().unwrap(), no_env);
        assert_eq!(store.get(), Config::default());
    }

    #[test]
    fn partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("config.json"),
            r#"{"publish_video_on_join":false}"#,
        )
        .unwrap();
        let store = ConfigStore::with_overrides(dir.path().to_str().unwrap(), no_env);
        let c = store.get();
        assert!(c.publish_audio_on_join);
        assert!(!c.publish_video_on_join);
        assert_eq!(c.request_timeout_secs, 15);
    }
}
