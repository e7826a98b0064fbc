// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the controller.

use thiserror::Error;

pub use crate::config::ConfigError;

/// Controller lifecycle errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Controller already running")]
    AlreadyRunning,

    #[error("Failed to spawn thread '{name}': {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading, starting or installing a NApp.
#[derive(Debug, Error)]
pub enum NAppLoadError {
    #[error("NApp '{name}' is not available in the catalog")]
    NotFound { name: String },

    #[error("NApp '{name}' is already loaded")]
    AlreadyLoaded { name: String },

    #[error("NApp '{name}' failed to initialize: {source}")]
    Init {
        name: String,
        #[source]
        source: NAppError,
    },

    #[error("NApp '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: NAppError,
    },

    #[error("NApp '{name}' listener rejected: {source}")]
    Listener {
        name: String,
        #[source]
        source: ListenerError,
    },

    #[error("NApp '{name}' cannot be installed: {reason}")]
    Unsupported { name: String, reason: String },
}

impl NAppLoadError {
    /// Name of the NApp the error refers to.
    pub fn napp_name(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::AlreadyLoaded { name }
            | Self::Init { name, .. }
            | Self::Start { name, .. }
            | Self::Listener { name, .. }
            | Self::Unsupported { name, .. } => name,
        }
    }
}

/// Error reported by NApp code itself (constructor or start hook).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NAppError(pub String);

impl NAppError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Listener registration and invocation errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Invalid event pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Listener failed: {0}")]
    Failed(String),
}

impl ListenerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors on a switch connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection {0} is closed")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error turning an outbound message into wire bytes.
#[derive(Debug, Error)]
#[error("Pack error: {0}")]
pub struct PackError(pub String);

/// Why an outbound event could not be delivered to its switch.
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("event has no 'message' content")]
    MissingMessage,

    #[error("event has no destination")]
    MissingDestination,

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_napp_load_error_carries_name() {
        let err = NAppLoadError::Init {
            name: "kytos/of_core".into(),
            source: NAppError::new("boom"),
        };
        assert_eq!(err.napp_name(), "kytos/of_core");
        assert!(err.to_string().contains("kytos/of_core"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Closed("127.0.0.1:6633".into());
        assert!(err.to_string().contains("closed"));

        let err = ConnectionError::Io(std::io::Error::other("reset"));
        assert!(err.to_string().contains("I/O"));
    }
}
