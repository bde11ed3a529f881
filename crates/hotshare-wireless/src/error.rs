//! Error types for hotshare-wireless

use thiserror::Error;

/// Result type alias for wireless operations
pub type Result<T> = std::result::Result<T, WirelessError>;

/// Main error type for wireless operations
#[derive(Error, Debug)]
pub enum WirelessError {
    /// Interface not found or invalid
    #[error("Interface error: {0}")]
    Interface(String),

    /// External command failed
    #[error("Command error: {0}")]
    Command(String),

    /// A supervised daemon failed to start or died
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// NAT or forwarding configuration failed
    #[error("NAT error: {0}")]
    Nat(String),

    /// Driver or hardware doesn't support operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid AP configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// System/OS error
    #[error("System error: {0}")]
    System(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WirelessError {
    /// Create an interface error
    pub fn interface(msg: impl Into<String>) -> Self {
        Self::Interface(msg.into())
    }

    /// Create a daemon error
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::Daemon(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }

    /// Check if this is a driver/hardware support error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
