//! Custom error types for the library.
//!
//! This module defines the error taxonomy shared by every layer of the
//! dispatch engine. Using the `thiserror` crate, it provides a centralized and
//! consistent way to report failures, from a socket that timed out to a method
//! resource that references an undeclared parameter.
//!
//! ## Error Hierarchy
//!
//! - **`TransportError`**: raised by a backend in [`crate::adapters`]. It knows
//!   nothing about which instrument it belongs to.
//! - **`InstrumentError`**: the user-visible error. Backend failures are wrapped
//!   into [`InstrumentError::Transport`] together with the instrument name and
//!   the command that was being sent, so the caller can diagnose the failure
//!   without re-deriving state.
//!
//! Nothing in the library swallows or retries these errors. Retry and backoff
//! belong to the caller or to a concrete driver built on top of the core.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Failure reported by a transport backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    #[error("Backend is not connected")]
    NotConnected,

    #[error("Failed to connect to '{address}': {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The command was rejected before anything was sent.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl TransportError {
    /// Builds a [`TransportError::ConnectFailed`] for `address`.
    pub fn connect_failed(address: impl Into<String>, reason: impl ToString) -> Self {
        TransportError::ConnectFailed {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the session may be broken. A command rejected before it
    /// reached the wire leaves the session intact.
    pub fn breaks_session(&self) -> bool {
        !matches!(self, TransportError::InvalidCommand(_))
    }
}

/// Error returned by instruments, registries, proxies and drivers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Backend I/O or timeout failure while talking to the instrument.
    #[error("[{instrument}] transport failure during '{command}': {source}")]
    Transport {
        instrument: String,
        command: String,
        #[source]
        source: TransportError,
    },

    /// Write, read or query attempted while the instrument is not connected.
    #[error("[{instrument}] not connected (attempted '{command}')")]
    NotConnected { instrument: String, command: String },

    /// A method resource is missing or malformed. Fatal at construction.
    #[error("Failed to load method resource '{resource}': {message}")]
    ConfigLoad { resource: String, message: String },

    /// Call-time mismatch between supplied arguments and a method template.
    #[error("[{instrument}] cannot bind arguments for '{method}': {message}")]
    ConfigBinding {
        instrument: String,
        method: String,
        message: String,
    },

    /// A supplied argument does not match its declared parameter type.
    #[error("[{instrument}] invalid argument '{parameter}' for '{method}': expected {expected}, got {found}")]
    Validation {
        instrument: String,
        method: String,
        parameter: String,
        expected: String,
        found: String,
    },

    /// Empty or malformed dynamic command chain.
    #[error("[{instrument}] invalid command path '{path}': {message}")]
    ProxyUsage {
        instrument: String,
        path: String,
        message: String,
    },

    /// Explicit registry call by a name the registry does not define.
    #[error("[{instrument}] no method named '{method}'")]
    UnknownMethod { instrument: String, method: String },

    /// The instrument answered, but not in the shape the caller expected.
    #[error("[{instrument}] unexpected response to '{command}': {response:?}")]
    UnexpectedResponse {
        instrument: String,
        command: String,
        response: String,
    },
}

impl InstrumentError {
    /// Builds a [`InstrumentError::ConfigLoad`] error.
    pub fn config_load(resource: impl Into<String>, message: impl Into<String>) -> Self {
        InstrumentError::ConfigLoad {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before anything reached the wire.
    pub fn is_pre_send(&self) -> bool {
        matches!(
            self,
            InstrumentError::NotConnected { .. }
                | InstrumentError::ConfigBinding { .. }
                | InstrumentError::Validation { .. }
                | InstrumentError::ProxyUsage { .. }
                | InstrumentError::UnknownMethod { .. }
        )
    }

    /// Name of the instrument the error belongs to, when there is one.
    pub fn instrument(&self) -> Option<&str> {
        match self {
            InstrumentError::Transport { instrument, .. }
            | InstrumentError::NotConnected { instrument, .. }
            | InstrumentError::ConfigBinding { instrument, .. }
            | InstrumentError::Validation { instrument, .. }
            | InstrumentError::ProxyUsage { instrument, .. }
            | InstrumentError::UnknownMethod { instrument, .. }
            | InstrumentError::UnexpectedResponse { instrument, .. } => Some(instrument),
            InstrumentError::ConfigLoad { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_keeps_context() {
        let err = InstrumentError::Transport {
            instrument: "smu".into(),
            command: ":MEAS:VOLT?".into(),
            source: TransportError::Timeout(Duration::from_millis(500)),
        };
        let text = err.to_string();
        assert!(text.contains("smu"));
        assert!(text.contains(":MEAS:VOLT?"));
        assert!(text.contains("500ms"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_pre_send_classification() {
        let not_connected = InstrumentError::NotConnected {
            instrument: "smu".into(),
            command: "*RST".into(),
        };
        assert!(not_connected.is_pre_send());

        let transport = InstrumentError::Transport {
            instrument: "smu".into(),
            command: "*RST".into(),
            source: TransportError::NotConnected,
        };
        assert!(!transport.is_pre_send());
    }

    #[test]
    fn test_config_load_has_no_instrument() {
        let err = InstrumentError::config_load("keithley_2450", "file not found");
        assert_eq!(err.instrument(), None);
        assert!(err.to_string().contains("keithley_2450"));
    }
}
