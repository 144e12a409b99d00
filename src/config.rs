use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::paths::resolve_path;

pub const DEFAULT_SETTINGS_PATH: &str = "/opt/etc/xkeen-panel/settings.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub xray: Xray,
    pub control: Control,
    pub logs: Logs,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request body accepted by either transport.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    91
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Xray {
    /// The single file served by the `config` endpoint.
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,
    /// Directory of named `*.json` files served by the `configs` endpoint.
    #[serde(default = "default_configs_dir")]
    pub configs_dir: PathBuf,
    /// xkeen routing lists (`*.lst`) listed and saved next to the configs.
    #[serde(default = "default_lists_dir")]
    pub lists_dir: Option<PathBuf>,
}

impl Default for Xray {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            configs_dir: default_configs_dir(),
            lists_dir: default_lists_dir(),
        }
    }
}

fn default_config_file() -> PathBuf {
    PathBuf::from("/opt/etc/xray/configs/config.json")
}

fn default_configs_dir() -> PathBuf {
    PathBuf::from("/opt/etc/xray/configs")
}

fn default_lists_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/opt/etc/xkeen"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Control {
    /// Program plus leading arguments; the action flag is appended.
    #[serde(default = "default_control_command")]
    pub command: Vec<String>,
    #[serde(default = "default_control_timeout")]
    pub timeout_seconds: u64,
    /// Log truncated before every control action.
    #[serde(default = "default_clear_log")]
    pub clear_log: Option<PathBuf>,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            command: default_control_command(),
            timeout_seconds: default_control_timeout(),
            clear_log: default_clear_log(),
        }
    }
}

fn default_control_command() -> Vec<String> {
    vec!["xkeen".to_string()]
}

fn default_control_timeout() -> u64 {
    30
}

fn default_clear_log() -> Option<PathBuf> {
    Some(PathBuf::from("/opt/var/log/xray/error.log"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Logs {
    #[serde(default = "default_tail_command")]
    pub tail_command: Vec<String>,
    #[serde(default = "default_tail_lines")]
    pub lines: usize,
    #[serde(default = "default_tail_timeout")]
    pub timeout_seconds: u64,
    /// Whitelist of log names the UI may request.
    #[serde(default = "default_log_files")]
    pub files: BTreeMap<String, PathBuf>,
}

impl Default for Logs {
    fn default() -> Self {
        Self {
            tail_command: default_tail_command(),
            lines: default_tail_lines(),
            timeout_seconds: default_tail_timeout(),
            files: default_log_files(),
        }
    }
}

fn default_tail_command() -> Vec<String> {
    vec!["tail".to_string()]
}

fn default_tail_lines() -> usize {
    100
}

fn default_tail_timeout() -> u64 {
    10
}

fn default_log_files() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([
        (
            "error.log".to_string(),
            PathBuf::from("/opt/var/log/xray/error.log"),
        ),
        (
            "access.log".to_string(),
            PathBuf::from("/opt/var/log/xray/access.log"),
        ),
    ])
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    /// Ask the control binary (`-status`) and match its report.
    #[default]
    Control,
    /// Exit status of `process_command`.
    Process,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub probe: Probe,
    #[serde(default = "default_process_command")]
    pub process_command: Vec<String>,
    #[serde(default = "default_running_phrase")]
    pub running_phrase: String,
    #[serde(default = "default_stopped_phrase")]
    pub stopped_phrase: String,
    #[serde(default = "default_status_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            probe: Probe::default(),
            process_command: default_process_command(),
            running_phrase: default_running_phrase(),
            stopped_phrase: default_stopped_phrase(),
            timeout_seconds: default_status_timeout(),
        }
    }
}

fn default_process_command() -> Vec<String> {
    vec!["pgrep".to_string(), "-f".to_string(), "xray".to_string()]
}

fn default_running_phrase() -> String {
    "запущен".to_string()
}

fn default_stopped_phrase() -> String {
    "не запущен".to_string()
}

fn default_status_timeout() -> u64 {
    15
}

impl Settings {
    fn resolve_paths(&mut self, base_dir: &Path) {
        self.xray.config_file = resolve_path(base_dir, &self.xray.config_file);
        self.xray.configs_dir = resolve_path(base_dir, &self.xray.configs_dir);
        if let Some(dir) = self.xray.lists_dir.take() {
            self.xray.lists_dir = Some(resolve_path(base_dir, dir));
        }
        if let Some(log) = self.control.clear_log.take() {
            self.control.clear_log = Some(resolve_path(base_dir, log));
        }
        for path in self.logs.files.values_mut() {
            *path = resolve_path(base_dir, &*path);
        }
    }

    fn validate(&self) -> Result<()> {
        for (key, command) in [
            ("control.command", &self.control.command),
            ("logs.tail_command", &self.logs.tail_command),
            ("status.process_command", &self.status.process_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                bail!("`{key}` must name a program");
            }
        }
        for (key, secs) in [
            ("control.timeout_seconds", self.control.timeout_seconds),
            ("logs.timeout_seconds", self.logs.timeout_seconds),
            ("status.timeout_seconds", self.status.timeout_seconds),
        ] {
            if secs == 0 {
                bail!("`{key}` must be greater than zero");
            }
        }
        if self.server.max_body_bytes == 0 {
            bail!("`server.max_body_bytes` must be greater than zero");
        }
        if self.logs.lines == 0 {
            bail!("`logs.lines` must be greater than zero");
        }
        if self.status.running_phrase.trim().is_empty() {
            bail!("`status.running_phrase` must not be empty");
        }
        Ok(())
    }
}

/// Load settings from `path`, or from the default location when it exists.
/// Falls back to built-in defaults when no path was given and nothing is installed.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_PATH);
            if !default.exists() {
                let settings = Settings::default();
                settings.validate()?;
                return Ok(settings);
            }
            default
        }
    };

    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let mut settings = parse_settings(&text)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    settings.resolve_paths(base_dir);
    Ok(settings)
}

fn parse_settings(text: &str) -> Result<Settings> {
    let mut settings: Settings = toml::from_str(text)?;
    // An empty string switches an optional path off.
    settings.xray.lists_dir = non_empty(settings.xray.lists_dir);
    settings.control.clear_log = non_empty(settings.control.clear_log);
    settings.validate()?;
    Ok(settings)
}

fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}
