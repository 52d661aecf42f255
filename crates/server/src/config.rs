use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Base URL of the chat platform bridge. `None` runs against the in-memory gateway.
    pub gateway_url: Option<String>,
    pub gateway_timeout_ms: u64,
    pub locations_path: String,
    pub initial_general_channel_id: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/soul_link.db".into(),
            gateway_url: None,
            gateway_timeout_ms: 5_000,
            locations_path: "config/locations.toml".into(),
            initial_general_channel_id: None,
        }
    }
}

impl Settings {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    gateway_url: Option<String>,
    gateway_timeout_ms: Option<u64>,
    locations_path: Option<String>,
    initial_general_channel_id: Option<i64>,
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new("server.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then `path` if it parses, then the environment. Later sources win.
pub(crate) fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring unreadable settings file")
            }
        }
    }

    let pick = |short: &str, app: &str| env(app).or_else(|| env(short));

    if let Some(v) = pick("SERVER_BIND", "APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Some(v) = pick("DATABASE_URL", "APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = pick("GATEWAY_URL", "APP__GATEWAY_URL") {
        settings.gateway_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    if let Some(v) = pick("LOCATIONS_PATH", "APP__LOCATIONS_PATH") {
        settings.locations_path = v;
    }
    if let Some(v) = env("APP__GATEWAY_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) if parsed > 0 => settings.gateway_timeout_ms = parsed,
            _ => warn!(value = %v, "ignoring invalid APP__GATEWAY_TIMEOUT_MS"),
        }
    }
    if let Some(v) = pick("INITIAL_GENERAL_CHANNEL_ID", "APP__INITIAL_GENERAL_CHANNEL_ID") {
        match v.parse::<i64>() {
            Ok(parsed) => settings.initial_general_channel_id = Some(parsed),
            Err(_) => warn!(value = %v, "ignoring invalid APP__INITIAL_GENERAL_CHANNEL_ID"),
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if file_cfg.gateway_url.is_some() {
        settings.gateway_url = file_cfg.gateway_url;
    }
    if let Some(v) = file_cfg.gateway_timeout_ms.filter(|ms| *ms > 0) {
        settings.gateway_timeout_ms = v;
    }
    if let Some(v) = file_cfg.locations_path {
        settings.locations_path = v;
    }
    if file_cfg.initial_general_channel_id.is_some() {
        settings.initial_general_channel_id = file_cfg.initial_general_channel_id;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if has_windows_drive(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url)
        .replace('\\', "/");
    if has_windows_drive(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
