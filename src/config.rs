use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cloud::events::{DEFAULT_DETAIL_TYPE, DEFAULT_SOURCE};
use crate::cloud::metadata::DEFAULT_METADATA_URL;
use crate::descriptor::{ServerDescriptor, StartingText};
use crate::net::server::ListenerConfig;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_LOG_DIR: &str = "logs";
const ICON_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Where to find things, taken from the command line and environment.
#[derive(Debug)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub bind_addr: Option<String>,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() > 2 {
            return Err("usage: standby [config-path]".to_string());
        }
        let config_path = args
            .get(1)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let log_dir = env_value("STANDBY_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let bind_addr = env_value("STANDBY_BIND_ADDR");
        Ok(Self {
            config_path,
            log_dir,
            bind_addr,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// On-disk server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub ip: String,
    pub port: u16,
    pub protocol: i32,
    /// Joined with newlines.
    pub motd: Vec<String>,
    pub version_text: String,
    /// Every line is terminated with a newline.
    pub kick_message: Vec<String>,
    pub server_icon: PathBuf,
    pub samples: Vec<String>,
    pub show_hostname_if_available: bool,
    pub player_max: u32,
    pub player_online: u32,
    pub starting: StartingConfig,
    pub limits: LimitsConfig,
    pub wake: WakeConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 25565,
            protocol: 2,
            motd: vec![
                "§4Maintenance!".to_string(),
                "§aCheck example.com for more information!".to_string(),
            ],
            version_text: "§4Maintenance".to_string(),
            kick_message: vec![
                "§bSorry".to_string(),
                String::new(),
                "§aThis server is offline!".to_string(),
            ],
            server_icon: PathBuf::from("server_icon.png"),
            samples: vec![
                "§bexample.com".to_string(),
                String::new(),
                "§4Maintenance".to_string(),
            ],
            show_hostname_if_available: true,
            player_max: 0,
            player_online: 0,
            starting: StartingConfig::default(),
            limits: LimitsConfig::default(),
            wake: WakeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartingConfig {
    pub motd: String,
    pub version_text: String,
    pub kick_message: String,
}

impl Default for StartingConfig {
    fn default() -> Self {
        let text = StartingText::default();
        Self {
            motd: text.motd,
            version_text: text.version_text,
            kick_message: text.kick_message,
        }
    }
}

impl From<&StartingConfig> for StartingText {
    fn from(config: &StartingConfig) -> Self {
        Self {
            motd: config.motd.clone(),
            version_text: config.version_text.clone(),
            kick_message: config.kick_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connections: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub hostname_cache: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let listener = ListenerConfig::default();
        Self {
            max_connections: listener.max_connections,
            read_timeout_ms: listener.read_timeout.as_millis() as u64,
            write_timeout_ms: listener.write_timeout.as_millis() as u64,
            max_frame_bytes: listener.max_frame_bytes,
            hostname_cache: 256,
            shutdown_grace_ms: listener.drain_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub enabled: bool,
    pub metadata_url: String,
    /// PutEvents endpoint. Without one the join attempt is only logged and the
    /// descriptor keeps its configured texts.
    pub event_bus_url: Option<String>,
    pub source: String,
    pub detail_type: String,
    pub request_timeout_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            event_bus_url: None,
            source: DEFAULT_SOURCE.to_string(),
            detail_type: DEFAULT_DETAIL_TYPE.to_string(),
            request_timeout_ms: 2000,
        }
    }
}

impl WakeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(FileConfig),
    /// No file existed; a default one was written to this path.
    Created(PathBuf),
}

pub fn load_or_create(path: &Path) -> Result<LoadOutcome, String> {
    if !path.exists() {
        write_default(path)?;
        return Ok(LoadOutcome::Created(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|err| format!("read config {} failed: {}", path.display(), err))?;
    let config = serde_yaml::from_str(&contents)
        .map_err(|err| format!("parse config {} failed: {}", path.display(), err))?;
    Ok(LoadOutcome::Loaded(config))
}

fn write_default(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|err| format!("create config directory failed: {}", err))?;
    }
    let contents = serde_yaml::to_string(&FileConfig::default())
        .map_err(|err| format!("encode default config failed: {}", err))?;
    std::fs::write(path, contents)
        .map_err(|err| format!("write config {} failed: {}", path.display(), err))
}

impl FileConfig {
    pub fn bind_addr(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    pub fn motd_text(&self) -> String {
        self.motd.join("\n")
    }

    pub fn kick_text(&self) -> String {
        self.kick_message
            .iter()
            .map(|line| format!("{line}\n"))
            .collect()
    }

    /// Builds the descriptor, resolving a relative icon path against `base_dir`.
    pub fn descriptor(&self, base_dir: &Path) -> Result<ServerDescriptor, String> {
        let icon_path = if self.server_icon.is_absolute() {
            self.server_icon.clone()
        } else {
            base_dir.join(&self.server_icon)
        };
        let icon = load_icon_data_uri(&icon_path)?;
        if icon.is_none() {
            warn!(
                "Server icon {} doesn't exist - submitting none...",
                icon_path.display()
            );
        }
        Ok(ServerDescriptor {
            motd: self.motd_text(),
            version_text: self.version_text.clone(),
            protocol: self.protocol,
            kick_message: self.kick_text(),
            player_max: self.player_max,
            player_online: self.player_online,
            samples: self.samples.clone(),
            icon,
            show_hostname: self.show_hostname_if_available,
        })
    }

    pub fn listener_config(&self, bind_override: Option<&str>) -> ListenerConfig {
        ListenerConfig {
            bind_addr: bind_override
                .map(str::to_string)
                .unwrap_or_else(|| self.bind_addr()),
            max_connections: self.limits.max_connections.max(1),
            read_timeout: Duration::from_millis(self.limits.read_timeout_ms.max(1)),
            write_timeout: Duration::from_millis(self.limits.write_timeout_ms.max(1)),
            max_frame_bytes: self.limits.max_frame_bytes.max(1),
            drain_timeout: Duration::from_millis(self.limits.shutdown_grace_ms),
        }
    }
}

/// `Ok(None)` when the file does not exist.
pub fn load_icon_data_uri(path: &Path) -> Result<Option<String>, String> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .map_err(|err| format!("read server icon {} failed: {}", path.display(), err))?;
    Ok(Some(encode_icon(&bytes)))
}

pub fn encode_icon(bytes: &[u8]) -> String {
    format!("{ICON_DATA_URI_PREFIX}{}", BASE64_ENGINE.encode(bytes))
}
