//! Error types for RemoteCam

use thiserror::Error;

/// Result type alias using RemoteCamError
pub type Result<T> = std::result::Result<T, RemoteCamError>;

/// Main error type for RemoteCam operations
#[derive(Debug, Error)]
pub enum RemoteCamError {
    /// No usable camera, characteristics, sizes or frame rates
    #[error("Capability error: {0}")]
    Capability(String),

    /// Camera open/configure failure or mid-stream disconnect
    #[error("Device error: {0}")]
    Device(String),

    /// Frame conversion or JPEG compression failure
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Bad password, bad token or rejected credential change
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Camera id not present on this host
    #[error("Camera not found: {0}")]
    SourceNotFound(String),

    /// No daemon or capture session to talk to
    #[error("No active capture session")]
    NoActiveSession,

    /// Session was destroyed while an operation was pending
    #[error("Capture session closed")]
    SessionClosed,

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RemoteCamError>,
    },
}

impl RemoteCamError {
    /// Create a capability error
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create an auth error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a server error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Operator-facing hint for resolving the error, if there is one
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Capability(_) => Some(
                "No usable camera was found. Check that a camera is connected and that \
                 `remotecam list` shows it.",
            ),
            Self::Device(_) => Some(
                "The camera could not be opened. Make sure no other application is using it \
                 and that your user can access /dev/video*.",
            ),
            Self::SourceNotFound(_) => {
                Some("Run `remotecam list` to see the available camera ids.")
            }
            Self::Server(_) => Some(
                "The HTTP port may already be in use. Change [server] port in config.toml.",
            ),
            Self::Config(_) => Some(
                "Check ~/.config/remotecam/config.toml, or regenerate it with \
                 `remotecam config init --force`.",
            ),
            Self::NoActiveSession => Some("Start the server first with `remotecam serve`."),
            Self::WithContext { source, .. } => source.user_hint(),
            _ => None,
        }
    }

    /// Whether the user can fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        match self {
            Self::Capability(_)
            | Self::Device(_)
            | Self::Auth(_)
            | Self::Server(_)
            | Self::Config(_)
            | Self::SourceNotFound(_)
            | Self::NoActiveSession => true,
            Self::WithContext { source, .. } => source.is_user_recoverable(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<image::ImageError> for RemoteCamError {
    fn from(err: image::ImageError) -> Self {
        Self::Encoder(err.to_string())
    }
}

impl From<toml::de::Error> for RemoteCamError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse TOML: {}", err))
    }
}
