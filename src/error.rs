//! Error types for the sync pipeline
//!
//! Only `ConnectionDropped` is recoverable, and it never leaves the hub
//! channel: the connection task turns it into a reconnect. Everything else
//! is fatal to the controller.

use thiserror::Error;

/// Errors raised by the hub channel, the state store, rendering and devices
#[derive(Debug, Error)]
pub enum Error {
    /// The transport to the hub was reset or closed
    #[error("Connection to hub dropped: {0}")]
    ConnectionDropped(String),

    /// The hub rejected the access token
    #[error("Hub rejected the access token: {0}")]
    AuthRejected(String),

    /// Undecodable frame or unexpected reply shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection task is gone (fatal error already reported, or shutdown)
    #[error("Hub channel closed")]
    ChannelClosed,

    /// No usable control surface at startup
    #[error("No Stream Deck found{}", .0.as_ref().map(|s| format!(": {}", s)).unwrap_or_default())]
    DeviceNotFound(Option<String>),

    /// The device rejected an operation
    #[error("Device error: {0}")]
    Device(String),

    /// Icon or font file not found or unreadable
    #[error("Missing asset '{path}': {reason}")]
    AssetMissing { path: String, reason: String },

    /// A button template failed to parse or evaluate
    #[error("Template error: {0}")]
    Template(String),

    /// A key image could not be produced
    #[error("Render failure: {0}")]
    Render(String),
}

impl Error {
    /// Build a protocol error from a JSON decode failure
    pub fn protocol(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Protocol(format!("{}: {}", context, err))
    }
}

/// Result alias for the library
pub type Result<T> = std::result::Result<T, Error>;
