use thiserror::Error;

/// Unified error type for Rotatify
#[derive(Error, Debug)]
pub enum RotatifyError {
    // Proxy list errors
    #[error("Invalid proxy address #{index} '{input}': {reason}")]
    InvalidProxyAddress {
        index: usize,
        input: String,
        reason: String,
    },

    // Request errors
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("CONNECT failed: {0}")]
    ConnectFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Rotation loop lifecycle
    #[error("Proxy rotation has been stopped and cannot be restarted")]
    RotationStopped,

    #[error("Proxy rotation is already running")]
    RotationAlreadyRunning,
}

/// Result type alias for Rotatify operations
pub type Result<T> = std::result::Result<T, RotatifyError>;

impl RotatifyError {
    /// Build an address error for the entry at `index`.
    pub fn invalid_address(index: usize, input: &str, reason: impl Into<String>) -> Self {
        RotatifyError::InvalidProxyAddress {
            index,
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error came from parsing caller input
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            RotatifyError::InvalidProxyAddress { .. }
                | RotatifyError::InvalidTarget(_)
                | RotatifyError::InvalidConfig(_)
        )
    }

    /// Check if this error happened while talking to a proxy or origin
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            RotatifyError::ProxyConnectionFailed(_)
                | RotatifyError::ConnectFailed(_)
                | RotatifyError::Tls(_)
                | RotatifyError::Http(_)
                | RotatifyError::Timeout
                | RotatifyError::Io(_)
        )
    }
}
