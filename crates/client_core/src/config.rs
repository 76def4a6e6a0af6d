use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "gallery-client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub api_prefix: String,
    pub upload_chunk_size: usize,
    pub upload_batch_debounce_ms: u64,
    pub export_poll_interval_ms: u64,
    pub export_ready_reset_ms: u64,
    /// `None` launches every upload at once.
    pub max_concurrent_uploads: Option<usize>,
    pub download_dir: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            api_prefix: "/api".into(),
            upload_chunk_size: 64 * 1024,
            upload_batch_debounce_ms: 500,
            export_poll_interval_ms: 2000,
            export_ready_reset_ms: 3000,
            max_concurrent_uploads: None,
            download_dir: PathBuf::from("."),
        }
    }
}

impl ClientSettings {
    pub fn upload_batch_debounce(&self) -> Duration {
        Duration::from_millis(self.upload_batch_debounce_ms)
    }

    pub fn export_poll_interval(&self) -> Duration {
        Duration::from_millis(self.export_poll_interval_ms)
    }

    pub fn export_ready_reset(&self) -> Duration {
        Duration::from_millis(self.export_ready_reset_ms)
    }

    fn apply_file(&mut self, file_cfg: SettingsFile) {
        if let Some(v) = file_cfg.server_url {
            self.server_url = v;
        }
        if let Some(v) = file_cfg.api_prefix {
            self.api_prefix = v;
        }
        if let Some(v) = file_cfg.upload_chunk_size {
            self.upload_chunk_size = v;
        }
        if let Some(v) = file_cfg.upload_batch_debounce_ms {
            self.upload_batch_debounce_ms = v;
        }
        if let Some(v) = file_cfg.export_poll_interval_ms {
            self.export_poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.export_ready_reset_ms {
            self.export_ready_reset_ms = v;
        }
        if let Some(v) = file_cfg.max_concurrent_uploads {
            self.max_concurrent_uploads = (v > 0).then_some(v);
        }
        if let Some(v) = file_cfg.download_dir {
            self.download_dir = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("GALLERY_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = parsed(&env, "APP__UPLOAD_CHUNK_SIZE") {
            self.upload_chunk_size = v;
        }
        if let Some(v) = parsed(&env, "APP__UPLOAD_BATCH_DEBOUNCE_MS") {
            self.upload_batch_debounce_ms = v;
        }
        if let Some(v) = parsed(&env, "APP__EXPORT_POLL_INTERVAL_MS") {
            self.export_poll_interval_ms = v;
        }
        if let Some(v) = parsed(&env, "APP__EXPORT_READY_RESET_MS") {
            self.export_ready_reset_ms = v;
        }
        if let Some(v) = parsed::<usize, _>(&env, "APP__MAX_CONCURRENT_UPLOADS") {
            self.max_concurrent_uploads = (v > 0).then_some(v);
        }
        if let Some(v) = env("APP__DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(v);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server_url: Option<String>,
    api_prefix: Option<String>,
    upload_chunk_size: Option<usize>,
    upload_batch_debounce_ms: Option<u64>,
    export_poll_interval_ms: Option<u64>,
    export_ready_reset_ms: Option<u64>,
    max_concurrent_uploads: Option<usize>,
    download_dir: Option<PathBuf>,
}

fn parsed<T, E>(env: &E, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    E: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting override");
            None
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<SettingsFile>(&raw) {
            Ok(file_cfg) => settings.apply_file(file_cfg),
            Err(err) => warn!(
                path = %path.display(),
                "ignoring malformed settings file: {err}"
            ),
        }
    }

    settings.apply_env(env);
    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
