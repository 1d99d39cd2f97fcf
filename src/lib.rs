//! Zentinel Request Stub
//!
//! An in-process engine that intercepts outgoing HTTP requests in tests and
//! answers them with simulated responses, without touching the network.
//!
//! # Features
//!
//! - **URL Matching**: Exact strings or whole-string regexes, first registered wins
//! - **Dynamic Rules**: Compute a response from the request, consulted before patterns
//! - **Failure Simulation**: Deliver network errors instead of bodies
//! - **Latency Simulation**: Delay delivery to exercise timeouts and cancellation
//! - **Cancellation**: Cancel an in-flight delivery and observe a distinct error
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zentinel_request_stub::{MockResponse, Request, RequestStub};
//! # use zentinel_request_stub::{DeliveryError, ResponseMetadata, ResponseSink};
//! # struct Client;
//! # impl ResponseSink for Client {
//! #     fn on_response_metadata(&self, _: &ResponseMetadata) {}
//! #     fn on_body_chunk(&self, _: &[u8]) {}
//! #     fn on_complete(&self) {}
//! #     fn on_error(&self, _: DeliveryError) {}
//! # }
//!
//! # async fn run() -> Result<(), zentinel_request_stub::StubError> {
//! let stub = RequestStub::new();
//! stub.install();
//! stub.add_regex_rule(
//!     r"https://api\.example\.com/users/\d+",
//!     MockResponse::success(r#"{"name": "Ada"}"#).with_delay(Duration::from_millis(50)),
//! )?;
//!
//! let request = Request::get("https://api.example.com/users/7");
//! if let Some(delivery) = stub.intercept(&request, Arc::new(Client))? {
//!     delivery.finished().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod matcher;
pub mod request;
pub mod response;
pub mod stats;
pub mod stub;

pub use config::StubConfig;
pub use delivery::{DeliveryHandle, DeliveryState, ResponseMetadata, ResponseSink};
pub use error::{DeliveryError, ErrorCode, SimulatedError, StubError};
pub use matcher::{DynamicRule, MatchResult, MatchSource, Pattern, RuleSet};
pub use request::Request;
pub use response::{MockResponse, Outcome};
pub use stats::StatsSnapshot;
pub use stub::{RequestObserver, RequestStub, StubSession};
