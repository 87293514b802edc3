//! Configuration file loading
//!
//! Loads user configuration from `~/.config/remotecam/config.toml`

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Rotation, ViewState, DEFAULT_QUALITY};
use crate::error::{RemoteCamError, Result};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 59713;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Initial capture settings
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Stream channel and status settings
    #[serde(default)]
    pub stream: StreamSettings,

    /// Credential storage
    #[serde(default)]
    pub credentials: CredentialSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Access token lifetime in seconds (0 = until next login)
    #[serde(default)]
    pub token_ttl_secs: u64,

    /// Tokens open exactly one stream
    #[serde(default = "default_true")]
    pub single_use_tokens: bool,
}

/// Capture settings applied at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Camera backend (synthetic, v4l2)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Camera id to open
    #[serde(default = "default_camera_id")]
    pub camera_id: String,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Index into the camera's resolution list
    #[serde(default)]
    pub resolution_index: Option<usize>,

    /// Index into the fps buckets (30, 15, 10, 5, 2, 1)
    #[serde(default)]
    pub fps_index: Option<usize>,

    /// Publish frames to network clients
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Render frames to a preview surface
    #[serde(default)]
    pub preview: bool,

    /// Display rotation in degrees
    #[serde(default)]
    pub rotation: Rotation,
}

/// Stream channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Frames buffered per client before new ones are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Interval between quick status updates in milliseconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

/// Credential storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// State file holding the password hash (default: data dir)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backend() -> String {
    "synthetic".to_string()
}

fn default_camera_id() -> String {
    "0".to_string()
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_channel_capacity() -> usize {
    10
}

fn default_stats_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            token_ttl_secs: 0,
            single_use_tokens: true,
        }
    }
}

impl ServerSettings {
    /// Socket address to listen on
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Token lifetime, if limited
    pub fn token_ttl(&self) -> Option<Duration> {
        (self.token_ttl_secs > 0).then(|| Duration::from_secs(self.token_ttl_secs))
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            camera_id: default_camera_id(),
            quality: default_quality(),
            resolution_index: None,
            fps_index: None,
            stream: true,
            preview: false,
            rotation: Rotation::Deg0,
        }
    }
}

impl CaptureSettings {
    /// Initial view state for a serving session
    pub fn view_state(&self) -> ViewState {
        ViewState {
            preview: self.preview,
            stream: self.stream,
            camera_id: self.camera_id.clone(),
            quality: self.quality,
            resolution_index: self.resolution_index,
            fps_index: self.fps_index,
            rotation: self.rotation,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            stats_interval_ms: default_stats_interval(),
        }
    }
}

impl StreamSettings {
    /// Quick status interval
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(100))
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("remotecam").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("remotecam")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/remotecam/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| RemoteCamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| RemoteCamError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.capture.view_state().validate()?;
        if self.stream.channel_capacity == 0 {
            return Err(RemoteCamError::config("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RemoteCamError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RemoteCamError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| RemoteCamError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        Self::default().save_to(path)?;
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# RemoteCam Configuration

[server]
# Address and port for the MJPEG HTTP server
bind = "0.0.0.0"
port = 59713

# Access token lifetime in seconds (0 = valid until the next login attempt)
token_ttl_secs = 0

# Each access token opens exactly one stream
single_use_tokens = true

[capture]
# Camera backend: synthetic, v4l2
backend = "synthetic"

# Camera id as shown by `remotecam list`
camera_id = "0"

# JPEG quality (1-100)
quality = 80

# Index into the camera's resolution list (largest first)
# resolution_index = 0

# Index into the fps buckets: 0=30, 1=15, 2=10, 3=5, 4=2, 5=1
# fps_index = 0

# Publish frames to network clients
stream = true

# Render frames to a preview surface
preview = false

# Display rotation in degrees: 0, 90, 180, 270
rotation = 0

[stream]
# Frames buffered per client; newer frames are dropped when full
channel_capacity = 10

# Interval between quick status updates (milliseconds)
stats_interval_ms = 1000

[credentials]
# State file holding the password hash (defaults to the data directory)
# path = "/var/lib/remotecam/state.toml"
"#
    .to_string()
}
