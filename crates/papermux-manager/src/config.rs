use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use papermux_process::{SessionName, VersionChannel};

use crate::error::ManagerError;
use crate::support::{env_string, env_u64, format_error_chain};

pub const DEFAULT_CONFIG_PATH: &str = "./manager_config.toml";

const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://papermc.io/api/v1/paper";
const DEFAULT_FALLBACK_CREATE: &str = "tmux new-session -d -s {session}";
const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;
const DEFAULT_STOP_GRACE_MS: u64 = 5000;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 15 * 60;

/// How `stop` waits for the server between the stop command and the kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopWait {
    /// Sleep the whole grace period.
    Fixed,
    /// Poll the pane's foreground command and return early once the server
    /// process has left it, still bounded by the grace period.
    Poll,
}

#[derive(Debug, serde::Deserialize)]
struct ConfigFile {
    manager: ManagerSection,
}

#[derive(Debug, serde::Deserialize)]
struct ManagerSection {
    session_name: SessionName,
    target_version: VersionChannel,
    #[serde(default)]
    server_args: String,
    #[serde(default)]
    artifact_dir: Option<PathBuf>,
    #[serde(default)]
    artifact_prefix: Option<String>,
    #[serde(default)]
    artifact_extension: Option<String>,
    #[serde(default)]
    download_base_url: Option<String>,
    #[serde(default)]
    download_timeout_secs: Option<u64>,
    #[serde(default)]
    java_command: Option<String>,
    #[serde(default)]
    settle_delay_ms: Option<u64>,
    #[serde(default)]
    stop_grace_ms: Option<u64>,
    #[serde(default)]
    stop_wait: Option<StopWait>,
    #[serde(default)]
    tmux_socket: Option<String>,
    #[serde(default)]
    fallback_create_command: Option<String>,
}

/// Read-only settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_name: SessionName,
    pub target_version: VersionChannel,
    pub server_args: String,
    pub artifact_dir: PathBuf,
    pub artifact_prefix: String,
    pub artifact_extension: String,
    pub download_base_url: String,
    pub download_timeout: Duration,
    pub java_command: String,
    pub settle_delay: Duration,
    pub stop_grace: Duration,
    pub stop_wait: StopWait,
    pub tmux_socket: Option<String>,
    pub fallback_create_command: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ManagerError> {
        if !path.exists() {
            return Err(ManagerError::Config(format!(
                "config file {} is missing, please create one",
                path.display()
            )));
        }
        let mut config = read_config(path)
            .map_err(|e| ManagerError::Config(format_error_chain(e.as_ref())))?;
        config.apply_overrides(env_string, env_u64);
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let file: ConfigFile = toml::from_str(raw)
            .context("parse config as TOML (INI-style files need string values quoted, e.g. session_name = \"mc1\")")?;
        let m = file.manager;

        let artifact_prefix = non_empty(m.artifact_prefix).unwrap_or_else(|| "paper".to_string());
        let artifact_extension = non_empty(m.artifact_extension)
            .map(|e| e.trim_start_matches('.').to_string())
            .unwrap_or_else(|| "jar".to_string());
        for (key, value) in [
            ("artifact_prefix", &artifact_prefix),
            ("artifact_extension", &artifact_extension),
        ] {
            if value.contains(['/', '\\', '*']) {
                anyhow::bail!("{key} must be a plain filename fragment (got {value:?})");
            }
        }

        let fallback_create_command = non_empty(m.fallback_create_command)
            .unwrap_or_else(|| DEFAULT_FALLBACK_CREATE.to_string());
        if !fallback_create_command.contains("{session}") {
            anyhow::bail!("fallback_create_command must contain the {{session}} placeholder");
        }

        Ok(Self {
            session_name: m.session_name,
            target_version: m.target_version,
            server_args: m.server_args.trim().to_string(),
            artifact_dir: m.artifact_dir.unwrap_or_else(|| PathBuf::from(".")),
            artifact_prefix,
            artifact_extension,
            download_base_url: non_empty(m.download_base_url)
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_BASE_URL.to_string()),
            download_timeout: Duration::from_secs(
                m.download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS)
                    .clamp(10, 6 * 60 * 60),
            ),
            java_command: non_empty(m.java_command)
                .unwrap_or_else(|| "/usr/bin/env java".to_string()),
            settle_delay: settle_delay(m.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS)),
            stop_grace: stop_grace(m.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS)),
            stop_wait: m.stop_wait.unwrap_or(StopWait::Fixed),
            tmux_socket: non_empty(m.tmux_socket),
            fallback_create_command,
        })
    }

    /// Environment wins over the file, e.g. `PAPERMUX_SETTLE_DELAY_MS=3000`.
    fn apply_overrides(
        &mut self,
        string_var: impl Fn(&str) -> Option<String>,
        u64_var: impl Fn(&str) -> Option<u64>,
    ) {
        if let Some(v) = string_var("PAPERMUX_DOWNLOAD_BASE_URL") {
            self.download_base_url = v;
        }
        if let Some(v) = string_var("PAPERMUX_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = string_var("PAPERMUX_TMUX_SOCKET") {
            self.tmux_socket = Some(v);
        }
        if let Some(v) = u64_var("PAPERMUX_SETTLE_DELAY_MS") {
            self.settle_delay = settle_delay(v);
        }
        if let Some(v) = u64_var("PAPERMUX_STOP_GRACE_MS") {
            self.stop_grace = stop_grace(v);
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    Config::from_toml_str(&raw).with_context(|| format!("load config {}", path.display()))
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn settle_delay(ms: u64) -> Duration {
    Duration::from_millis(ms.min(60_000))
}

fn stop_grace(ms: u64) -> Duration {
    Duration::from_millis(ms.min(10 * 60 * 1000))
}
