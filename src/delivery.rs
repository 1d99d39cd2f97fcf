//! Per-request response delivery.
//!
//! Every claimed request gets its own [`DeliveryTask`], spawned as an
//! independent tokio task so concurrent requests never wait on each other.
//! The task sleeps for the configured delay, then hands the response to the
//! request's [`ResponseSink`].
//!
//! Firing and cancellation race for the task's state cell. Whichever moves
//! it out of [`DeliveryState::Scheduled`] first owns the outcome; the other
//! side becomes a no-op. A sink therefore sees exactly one terminal signal:
//! `on_complete`, a simulated `on_error`, or a single
//! [`DeliveryError::Cancelled`].
//!
//! A task dropped before it fires (for example when the runtime shuts down)
//! is reported as cancelled. A task whose sink panics mid-delivery ends in
//! [`DeliveryState::Failed`]. Either way [`DeliveryHandle::finished`] resolves.

use crate::error::{DeliveryError, StubError};
use crate::response::{MockResponse, Outcome};
use crate::stats::StubStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receiver of delivery signals, implemented by the transport pipeline.
///
/// Call order for one request is either
/// `on_response_metadata`, `on_body_chunk`, `on_complete`, or
/// `on_response_metadata`, `on_error`, or a lone `on_error` when the
/// request was cancelled before anything was delivered.
pub trait ResponseSink: Send + Sync {
    fn on_response_metadata(&self, metadata: &ResponseMetadata);
    fn on_body_chunk(&self, chunk: &[u8]);
    fn on_complete(&self);
    fn on_error(&self, error: DeliveryError);
}

/// Status line and headers of a simulated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub url: Option<String>,
    pub status: u16,
    pub http_version: String,
    pub headers: HashMap<String, String>,
}

impl ResponseMetadata {
    fn new(url: Option<String>, response: &MockResponse) -> Self {
        Self {
            url,
            status: response.status,
            http_version: response.http_version.clone(),
            headers: response.headers.clone().unwrap_or_default(),
        }
    }
}

/// Lifecycle of a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Scheduled,
    Delivering,
    Completed,
    Failed,
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryState::Completed | DeliveryState::Failed | DeliveryState::Cancelled
        )
    }
}

struct Shared {
    state: Mutex<DeliveryState>,
    cancel: CancellationToken,
    /// Flipped once the terminal signal has been handed to the sink.
    settled: watch::Sender<bool>,
}

impl Shared {
    /// Move from `from` to `to` if the task is still in `from`.
    fn transition(&self, from: DeliveryState, to: DeliveryState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn set(&self, to: DeliveryState) {
        *self.state.lock() = to;
    }
}

/// The worker half of a scheduled delivery.
pub struct DeliveryTask {
    shared: Arc<Shared>,
    url: Option<String>,
    response: Arc<MockResponse>,
    sink: Arc<dyn ResponseSink>,
    stats: Arc<StubStats>,
}

impl DeliveryTask {
    /// Schedule delivery of `response` to `sink` on the current tokio runtime.
    pub fn spawn(
        url: Option<String>,
        response: Arc<MockResponse>,
        sink: Arc<dyn ResponseSink>,
        stats: Arc<StubStats>,
    ) -> Result<DeliveryHandle, StubError> {
        let runtime = current_runtime()?;
        Ok(Self::spawn_on(&runtime, url, response, sink, stats))
    }

    /// Schedule delivery on a specific runtime.
    pub fn spawn_on(
        runtime: &Handle,
        url: Option<String>,
        response: Arc<MockResponse>,
        sink: Arc<dyn ResponseSink>,
        stats: Arc<StubStats>,
    ) -> DeliveryHandle {
        let (settled, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(DeliveryState::Scheduled),
            cancel: CancellationToken::new(),
            settled,
        });

        let task = DeliveryTask {
            shared: Arc::clone(&shared),
            url,
            response,
            sink,
            stats,
        };
        runtime.spawn(task.run());

        DeliveryHandle { shared }
    }

    async fn run(self) {
        let delay = self.response.effective_delay();
        if !delay.is_zero() {
            debug!(
                url = self.url.as_deref().unwrap_or_default(),
                delay = ?delay,
                "Delaying stub response"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shared.cancel.cancelled() => {}
            }
        }

        if self
            .shared
            .transition(DeliveryState::Scheduled, DeliveryState::Delivering)
        {
            self.deliver();
        } else {
            // Only cancel() moves a task out of Scheduled besides us.
            debug!(url = self.url.as_deref().unwrap_or_default(), "Stub delivery cancelled");
            self.stats.record_cancelled();
            self.sink.on_error(DeliveryError::Cancelled);
        }
    }

    fn deliver(&self) {
        let metadata = ResponseMetadata::new(self.url.clone(), &self.response);
        self.sink.on_response_metadata(&metadata);

        match &self.response.outcome {
            Outcome::Success(body) => {
                self.sink.on_body_chunk(body);
                self.sink.on_complete();
                self.stats.record_completed();
                self.shared.set(DeliveryState::Completed);
                debug!(
                    url = self.url.as_deref().unwrap_or_default(),
                    status = self.response.status,
                    bytes = body.len(),
                    "Stub response delivered"
                );
            }
            Outcome::Failure(error) => {
                self.sink.on_error(DeliveryError::Simulated(error.clone()));
                self.stats.record_failed();
                self.shared.set(DeliveryState::Failed);
                debug!(
                    url = self.url.as_deref().unwrap_or_default(),
                    error = %error,
                    "Stub failure delivered"
                );
            }
        }
    }
}

impl Drop for DeliveryTask {
    fn drop(&mut self) {
        if self
            .shared
            .transition(DeliveryState::Scheduled, DeliveryState::Cancelled)
        {
            debug!(
                url = self.url.as_deref().unwrap_or_default(),
                "Stub delivery dropped before firing"
            );
            self.stats.record_cancelled();
            self.sink.on_error(DeliveryError::Cancelled);
        } else if self
            .shared
            .transition(DeliveryState::Delivering, DeliveryState::Failed)
        {
            // A sink callback panicked; the sink gets no further signals.
            warn!(
                url = self.url.as_deref().unwrap_or_default(),
                "Stub delivery aborted mid-response"
            );
            self.stats.record_failed();
        }
        self.shared.settled.send_replace(true);
    }
}

/// The tokio runtime delivery tasks are spawned on.
pub(crate) fn current_runtime() -> Result<Handle, StubError> {
    Handle::try_current().map_err(|_| StubError::NoRuntime)
}

/// Caller-side handle to a scheduled delivery.
///
/// Dropping the handle does not cancel the delivery.
#[derive(Clone)]
pub struct DeliveryHandle {
    shared: Arc<Shared>,
}

impl DeliveryHandle {
    /// Stop the delivery if it has not fired yet.
    ///
    /// Returns `true` if this call cancelled the task. Calling it again, or
    /// after the response started delivering, does nothing.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .shared
            .transition(DeliveryState::Scheduled, DeliveryState::Cancelled);
        if cancelled {
            self.shared.cancel.cancel();
        }
        cancelled
    }

    pub fn state(&self) -> DeliveryState {
        *self.shared.state.lock()
    }

    /// Wait until the sink has received its terminal signal.
    pub async fn finished(&self) -> DeliveryState {
        let mut settled = self.shared.settled.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot close.
        let _ = settled.wait_for(|done| *done).await;
        self.state()
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("state", &self.state())
            .finish()
    }
}
