//! Simulated response descriptors.

use crate::error::SimulatedError;
use std::collections::HashMap;
use std::time::Duration;

/// Default HTTP version reported in response metadata.
pub const DEFAULT_HTTP_VERSION: &str = "HTTP/1.1";

/// Status code used by [`MockResponse::failure`].
pub const FAILURE_STATUS: u16 = 999;

/// Outcome of a simulated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Deliver these bytes as the body, then complete.
    Success(Vec<u8>),
    /// Fail with this error after the metadata. No body is delivered.
    Failure(SimulatedError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// An immutable description of a simulated response.
///
/// Status and headers are independent of the outcome, so a failure may carry
/// a 200 and a success may carry a 500. Nothing is validated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub http_version: String,
    pub headers: Option<HashMap<String, String>>,
    pub outcome: Outcome,
    /// Simulated latency before anything is delivered.
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn new(status: u16, outcome: Outcome) -> Self {
        Self {
            status,
            http_version: DEFAULT_HTTP_VERSION.to_string(),
            headers: None,
            outcome,
            delay: None,
        }
    }

    /// A 200 JSON response with the given body.
    pub fn success(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, Outcome::Success(body.into())).with_header("Content-Type", "application/json")
    }

    /// A transport-level failure: no headers, status [`FAILURE_STATUS`].
    pub fn failure(error: impl Into<SimulatedError>) -> Self {
        Self::new(FAILURE_STATUS, Outcome::Failure(error.into()))
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_http_version(mut self, version: impl Into<String>) -> Self {
        self.http_version = version.into();
        self
    }

    /// The delay to wait before firing, zero when none is configured.
    pub fn effective_delay(&self) -> Duration {
        self.delay.unwrap_or(Duration::ZERO)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}
