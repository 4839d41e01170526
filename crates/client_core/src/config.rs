use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "chat.toml";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub backend_url: String,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Deadline for one streamed response; `None` or `0` means no deadline.
    pub stream_timeout_seconds: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.into(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
            stream_timeout_seconds: None,
        }
    }
}

impl ClientSettings {
    pub fn backend_url(&self) -> anyhow::Result<Url> {
        normalize_backend_url(&self.backend_url)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}

/// Defaults, then the TOML file at `path` if readable, then the environment.
pub fn load_settings(path: &Path) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_config(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file_config(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| match file_cfg.get(key) {
        Some(toml::Value::String(v)) => Some(v.clone()),
        Some(toml::Value::Integer(v)) => Some(v.to_string()),
        _ => None,
    };

    if let Some(v) = text("backend_url") {
        settings.backend_url = v;
    }
    if let Some(v) = text("connect_timeout_seconds").and_then(|v| v.parse().ok()) {
        settings.connect_timeout_seconds = v;
    }
    if let Some(v) = text("request_timeout_seconds").and_then(|v| v.parse().ok()) {
        settings.request_timeout_seconds = v;
    }
    if let Some(v) = text("stream_timeout_seconds").and_then(|v| v.parse().ok()) {
        settings.stream_timeout_seconds = Some(v);
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CHAT_BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = var("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(v) = var("APP__CONNECT_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        settings.connect_timeout_seconds = v;
    }
    if let Some(v) = var("APP__REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_seconds = v;
    }
    if let Some(v) = var("APP__STREAM_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        settings.stream_timeout_seconds = Some(v);
    }
}

/// Parses the backend base URL. The path always ends in `/` so endpoint
/// joins keep any prefix the backend is mounted under.
pub fn normalize_backend_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_BACKEND_URL } else { raw };

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let mut url =
        Url::parse(&candidate).with_context(|| format!("invalid backend url '{raw}'"))?;

    if !matches!(url.scheme(), "http" | "https") {
        bail!("backend url '{raw}' must use http or https");
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
