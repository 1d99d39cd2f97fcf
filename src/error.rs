//! Error types.
//!
//! [`StubError`] covers configuration and claim-time failures, surfaced
//! synchronously to the caller. [`DeliveryError`] is what a transport
//! pipeline receives when a request fails, either because the stub was
//! configured to fail or because the delivery was cancelled.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised synchronously by the engine.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error("Invalid regex pattern {pattern:?}: {source}")]
    MalformedPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("No stub rule matches {0}")]
    Unmatched(String),
    #[error("Delivery requires a running tokio runtime")]
    NoRuntime,
    #[error("Invalid stub configuration: {0}")]
    Config(String),
}

/// Network error codes a failure stub can simulate.
///
/// Cancellation has no code here; it is reported as [`DeliveryError::Cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotConnectedToInternet,
    TimedOut,
    CannotFindHost,
    CannotConnectToHost,
    NetworkConnectionLost,
    DnsLookupFailed,
    BadServerResponse,
    SecureConnectionFailed,
    /// Any other host-specific code.
    Other(i32),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotConnectedToInternet => f.write_str("not connected to internet"),
            ErrorCode::TimedOut => f.write_str("timed out"),
            ErrorCode::CannotFindHost => f.write_str("cannot find host"),
            ErrorCode::CannotConnectToHost => f.write_str("cannot connect to host"),
            ErrorCode::NetworkConnectionLost => f.write_str("network connection lost"),
            ErrorCode::DnsLookupFailed => f.write_str("DNS lookup failed"),
            ErrorCode::BadServerResponse => f.write_str("bad server response"),
            ErrorCode::SecureConnectionFailed => f.write_str("secure connection failed"),
            ErrorCode::Other(code) => write!(f, "error code {}", code),
        }
    }
}

/// The error a failure stub delivers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: Option<String>,
}

impl SimulatedError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for SimulatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for SimulatedError {}

impl From<ErrorCode> for SimulatedError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

/// Terminal failure signal sent to a [`ResponseSink`](crate::delivery::ResponseSink).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Simulated failure: {0}")]
    Simulated(SimulatedError),
    #[error("Request cancelled")]
    Cancelled,
}

impl DeliveryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled)
    }

    /// The simulated error code, if this is not a cancellation.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            DeliveryError::Simulated(err) => Some(err.code),
            DeliveryError::Cancelled => None,
        }
    }
}
