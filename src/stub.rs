//! The request stub engine.

use crate::config::{GlobalSettings, StubConfig};
use crate::delivery::{current_runtime, DeliveryHandle, DeliveryTask, ResponseSink};
use crate::error::StubError;
use crate::matcher::{DynamicRule, MatchResult, Pattern, RuleSet};
use crate::request::Request;
use crate::response::MockResponse;
use crate::stats::{StatsSnapshot, StubStats};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Notified with every request the engine claims, before delivery is scheduled.
pub trait RequestObserver: Send + Sync {
    fn on_request(&self, request: &Request);
}

impl<F> RequestObserver for F
where
    F: Fn(&Request) + Send + Sync,
{
    fn on_request(&self, request: &Request) {
        self(request)
    }
}

struct Inner {
    rules: RwLock<RuleSet>,
    observer: RwLock<Option<Arc<dyn RequestObserver>>>,
    installed: AtomicBool,
    settings: GlobalSettings,
    stats: Arc<StubStats>,
}

/// Request stub engine.
///
/// Holds the rule set and decides, per request, whether to claim it and
/// what to deliver. Cloning yields another handle to the same engine, so a
/// test can keep one while the networking layer holds another.
///
/// Rules should be configured while no request is in flight; a typical
/// test adds its rules, runs, then calls [`clear_all_rules`](Self::clear_all_rules).
#[derive(Clone)]
pub struct RequestStub {
    inner: Arc<Inner>,
}

impl Default for RequestStub {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStub {
    pub fn new() -> Self {
        Self::with_settings(GlobalSettings::default())
    }

    pub fn with_settings(settings: GlobalSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                rules: RwLock::new(RuleSet::new()),
                observer: RwLock::new(None),
                installed: AtomicBool::new(false),
                settings,
                stats: Arc::new(StubStats::new()),
            }),
        }
    }

    /// Create an engine with the rules and settings from a configuration.
    pub fn from_config(config: &StubConfig) -> Result<Self, StubError> {
        let stub = Self::with_settings(config.settings.clone());
        stub.load_config(config)?;
        Ok(stub)
    }

    /// Append the enabled rules of a configuration, in file order.
    ///
    /// Nothing is added if any rule fails to compile.
    pub fn load_config(&self, config: &StubConfig) -> Result<(), StubError> {
        let compiled = config.compile()?;
        let count = compiled.len();
        let mut rules = self.inner.rules.write();
        for rule in compiled {
            rules.push(rule);
        }
        info!(rules = count, total = rules.len(), "Loaded stub rules");
        Ok(())
    }

    /// Start claiming requests from the host networking layer.
    pub fn install(&self) {
        if !self.inner.installed.swap(true, Ordering::SeqCst) {
            info!("Request stub installed");
        }
    }

    /// Stop claiming requests. In-flight deliveries are unaffected.
    pub fn uninstall(&self) {
        if self.inner.installed.swap(false, Ordering::SeqCst) {
            info!("Request stub uninstalled");
        }
    }

    pub fn is_installed(&self) -> bool {
        self.inner.installed.load(Ordering::SeqCst)
    }

    /// A session routed exclusively through this engine.
    pub fn session(&self) -> StubSession {
        StubSession { stub: self.clone() }
    }

    pub fn add_rule(&self, pattern: Pattern, response: MockResponse) {
        debug!(pattern = ?pattern, status = response.status, "Adding stub rule");
        self.inner.rules.write().add(pattern, response);
    }

    /// Match `url` exactly.
    pub fn add_exact_rule(&self, url: impl Into<String>, response: MockResponse) {
        self.add_rule(Pattern::exact(url), response);
    }

    /// Match URLs the regex matches in full.
    pub fn add_regex_rule(&self, pattern: &str, response: MockResponse) -> Result<(), StubError> {
        self.add_rule(Pattern::regex(pattern)?, response);
        Ok(())
    }

    /// Replace the dynamic rule.
    pub fn set_dynamic_rule(&self, rule: impl DynamicRule + 'static) {
        self.inner.rules.write().set_dynamic(Some(Arc::new(rule)));
    }

    pub fn clear_dynamic_rule(&self) {
        self.inner.rules.write().set_dynamic(None);
    }

    /// Replace the observer. `None` removes it.
    pub fn set_observer(&self, observer: Option<Arc<dyn RequestObserver>>) {
        *self.inner.observer.write() = observer;
    }

    /// Remove every pattern rule and the dynamic rule.
    pub fn clear_all_rules(&self) {
        self.inner.rules.write().clear();
        debug!("Cleared all stub rules");
    }

    pub fn rule_count(&self) -> usize {
        self.inner.rules.read().len()
    }

    /// The rule that would claim `request`, without side effects.
    pub fn find_match(&self, request: &Request) -> Option<MatchResult> {
        self.inner.rules.read().find_match(request)
    }

    /// Whether the host layer should hand `request` to this engine.
    ///
    /// Safe to call speculatively and repeatedly.
    pub fn should_intercept(&self, request: &Request) -> bool {
        self.is_installed() && self.find_match(request).is_some()
    }

    /// Claim `request` and schedule its simulated response.
    ///
    /// Returns `Ok(None)` when the engine is not installed or no rule
    /// matches; the host layer should then proceed normally.
    pub fn intercept(
        &self,
        request: &Request,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<Option<DeliveryHandle>, StubError> {
        if !self.is_installed() {
            return Ok(None);
        }
        self.claim(request, sink)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn claim(
        &self,
        request: &Request,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<Option<DeliveryHandle>, StubError> {
        let stats = &self.inner.stats;
        let Some(result) = self.find_match(request) else {
            stats.record_request();
            stats.record_unmatched();
            // Only the pattern phase needs a URL; a dynamic rule may still claim.
            if request.url().is_none() {
                stats.record_unresolvable();
            }
            if self.inner.settings.log_unmatched {
                info!(
                    method = %request.method(),
                    url = %request.display_url(),
                    "No matching stub rule"
                );
            }
            return Ok(None);
        };

        if self.inner.settings.log_matches {
            info!(
                rule = %result.source,
                method = %request.method(),
                url = %request.display_url(),
                status = result.response.status,
                "Request matched stub rule"
            );
        }

        // Nothing is observed or counted for a claim that cannot be scheduled.
        let runtime = current_runtime()?;
        stats.record_request();

        let observer = self.inner.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_request(request);
        }

        let handle = DeliveryTask::spawn_on(
            &runtime,
            request.url().map(str::to_string),
            result.response,
            sink,
            Arc::clone(stats),
        );
        stats.record_claimed();
        Ok(Some(handle))
    }
}

impl std::fmt::Debug for RequestStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStub")
            .field("installed", &self.is_installed())
            .field("rules", &*self.inner.rules.read())
            .finish()
    }
}

/// A networking session that routes every request through the engine,
/// whether or not it is installed globally.
#[derive(Debug, Clone)]
pub struct StubSession {
    stub: RequestStub,
}

impl StubSession {
    pub fn should_intercept(&self, request: &Request) -> bool {
        self.stub.find_match(request).is_some()
    }

    /// Send `request` through the engine.
    ///
    /// The session has no other route, so an unmatched request is an error.
    pub fn send(
        &self,
        request: &Request,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<DeliveryHandle, StubError> {
        self.stub
            .claim(request, sink)?
            .ok_or_else(|| StubError::Unmatched(request.display_url().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::{RecordingSink, Signal};
    use crate::delivery::DeliveryState;
    use crate::error::{DeliveryError, ErrorCode};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn installed_stub() -> RequestStub {
        let stub = RequestStub::new();
        stub.install();
        stub
    }

    #[test]
    fn test_match_after_rules_added_and_cleared() {
        let stub = installed_stub();
        let request = Request::get("https://example.com/hello");
        assert!(!stub.should_intercept(&request));

        stub.add_exact_rule("https://example.com/hello", MockResponse::success(Vec::new()));
        assert!(stub.should_intercept(&request));

        stub.clear_all_rules();
        assert!(!stub.should_intercept(&request));
        assert_eq!(stub.rule_count(), 0);

        stub.add_regex_rule(r"https://example\.com.+", MockResponse::success(Vec::new()))
            .unwrap();
        assert!(stub.should_intercept(&request));
        assert!(stub.should_intercept(&Request::get("https://example.com/world")));
        assert!(!stub.should_intercept(&Request::get("http://example.com/hello")));
    }

    #[test]
    fn test_malformed_regex_rule_not_added() {
        let stub = RequestStub::new();
        let err = stub
            .add_regex_rule("https://example.com/[", MockResponse::success(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, StubError::MalformedPattern { .. }));
        assert_eq!(stub.rule_count(), 0);
    }

    #[test]
    fn test_install_gates_interception() {
        let stub = RequestStub::new();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();
        let request = Request::get("https://example.com/hello");

        assert!(!stub.should_intercept(&request));
        stub.install();
        stub.install();
        assert!(stub.should_intercept(&request));
        stub.uninstall();
        assert!(!stub.should_intercept(&request));
    }

    #[test]
    fn test_should_intercept_has_no_side_effects() {
        let stub = installed_stub();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        stub.set_observer(Some(Arc::new(move |_: &Request| *counter.lock() += 1)));

        let request = Request::get("https://example.com/hello");
        for _ in 0..3 {
            assert!(stub.should_intercept(&request));
        }
        assert_eq!(*seen.lock(), 0);
        assert_eq!(stub.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_dynamic_rule_precedence() {
        let stub = installed_stub();
        stub.add_exact_rule("https://example.com/hello", MockResponse::success("pattern"));
        stub.set_dynamic_rule(|_: &Request| Some(MockResponse::success("dynamic")));

        let result = stub.find_match(&Request::get("https://example.com/hello")).unwrap();
        assert_eq!(result.response.outcome, crate::response::Outcome::Success(b"dynamic".to_vec()));

        stub.clear_dynamic_rule();
        let result = stub.find_match(&Request::get("https://example.com/hello")).unwrap();
        assert_eq!(result.response.outcome, crate::response::Outcome::Success(b"pattern".to_vec()));
    }

    #[test]
    fn test_clear_all_rules_clears_dynamic_rule() {
        let stub = installed_stub();
        stub.set_dynamic_rule(|_: &Request| Some(MockResponse::success(Vec::new())));
        assert!(stub.should_intercept(&Request::get("abcd://abcd.com/abcd")));

        stub.clear_all_rules();
        assert!(!stub.should_intercept(&Request::get("abcd://abcd.com/abcd")));
    }

    #[tokio::test]
    async fn test_intercept_delivers_success() {
        let stub = installed_stub();
        stub.add_exact_rule("https://example.com/hello", MockResponse::success("hello"));
        let sink = RecordingSink::new();

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), sink.clone())
            .unwrap()
            .unwrap();

        assert_eq!(handle.finished().await, DeliveryState::Completed);
        assert_eq!(
            sink.signals(),
            vec![
                Signal::Metadata(200),
                Signal::Body(b"hello".to_vec()),
                Signal::Complete
            ]
        );

        let stats = stub.stats();
        assert_eq!(stats.requests_total, 1);
        assert_eq!(stats.requests_claimed, 1);
        assert_eq!(stats.deliveries_completed, 1);
    }

    #[tokio::test]
    async fn test_intercept_delivers_failure() {
        let stub = installed_stub();
        stub.add_exact_rule(
            "https://example.com/hello",
            MockResponse::failure(ErrorCode::NotConnectedToInternet),
        );
        let sink = RecordingSink::new();

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), sink.clone())
            .unwrap()
            .unwrap();

        assert_eq!(handle.finished().await, DeliveryState::Failed);
        let signals = sink.signals();
        assert_eq!(signals.len(), 2);
        assert_eq!(
            signals[1],
            Signal::Error(DeliveryError::Simulated(ErrorCode::NotConnectedToInternet.into()))
        );
        assert_eq!(stub.stats().deliveries_failed, 1);
    }

    #[tokio::test]
    async fn test_intercept_unmatched() {
        let stub = installed_stub();
        let sink = RecordingSink::new();

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), sink.clone())
            .unwrap();

        assert!(handle.is_none());
        assert!(sink.signals().is_empty());
        assert_eq!(stub.stats().requests_unmatched, 1);
    }

    #[tokio::test]
    async fn test_intercept_when_not_installed() {
        let stub = RequestStub::new();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), RecordingSink::new())
            .unwrap();
        assert!(handle.is_none());
        assert_eq!(stub.stats().requests_total, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_request_counted() {
        let stub = installed_stub();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();

        let handle = stub
            .intercept(&Request::unresolved("GET"), RecordingSink::new())
            .unwrap();
        assert!(handle.is_none());

        let stats = stub.stats();
        assert_eq!(stats.requests_unresolvable, 1);
        assert_eq!(stats.requests_unmatched, 1);
    }

    #[tokio::test]
    async fn test_dynamic_claim_of_unresolved_request_not_unresolvable() {
        let stub = installed_stub();
        stub.set_dynamic_rule(|request: &Request| {
            request
                .url()
                .is_none()
                .then(|| MockResponse::success("dynamic"))
        });

        let handle = stub
            .intercept(&Request::unresolved("GET"), RecordingSink::new())
            .unwrap()
            .unwrap();
        handle.finished().await;

        let stats = stub.stats();
        assert_eq!(stats.requests_claimed, 1);
        assert_eq!(stats.requests_unresolvable, 0);
        assert_eq!(stats.requests_unmatched, 0);
    }

    #[tokio::test]
    async fn test_observer_sees_claimed_requests() {
        let stub = installed_stub();
        stub.add_exact_rule("https://example.com/hello", MockResponse::success(Vec::new()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        stub.set_observer(Some(Arc::new(move |request: &Request| {
            log.lock().push(request.url().unwrap_or_default().to_string());
        })));

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), RecordingSink::new())
            .unwrap()
            .unwrap();
        handle.finished().await;
        stub.intercept(&Request::get("https://example.com/other"), RecordingSink::new())
            .unwrap();

        assert_eq!(*seen.lock(), vec!["https://example.com/hello".to_string()]);

        stub.set_observer(None);
        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), RecordingSink::new())
            .unwrap()
            .unwrap();
        handle.finished().await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_delayed_request() {
        let stub = installed_stub();
        stub.add_exact_rule(
            "https://example.com/hello",
            MockResponse::new(200, crate::response::Outcome::Success(Vec::new()))
                .with_delay(Duration::from_secs(5)),
        );
        let sink = RecordingSink::new();

        let handle = stub
            .intercept(&Request::get("https://example.com/hello"), sink.clone())
            .unwrap()
            .unwrap();
        handle.cancel();

        assert_eq!(handle.finished().await, DeliveryState::Cancelled);
        assert_eq!(sink.signals(), vec![Signal::Error(DeliveryError::Cancelled)]);
        assert_eq!(stub.stats().deliveries_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_independent() {
        let stub = installed_stub();
        stub.add_exact_rule(
            "https://example.com/fast",
            MockResponse::success("fast").with_delay(Duration::from_millis(100)),
        );
        stub.add_exact_rule(
            "https://example.com/slow",
            MockResponse::success("slow").with_delay(Duration::from_millis(300)),
        );
        let fast_sink = RecordingSink::new();
        let slow_sink = RecordingSink::new();

        let slow = stub
            .intercept(&Request::get("https://example.com/slow"), slow_sink.clone())
            .unwrap()
            .unwrap();
        let fast = stub
            .intercept(&Request::get("https://example.com/fast"), fast_sink.clone())
            .unwrap()
            .unwrap();

        assert_eq!(fast.finished().await, DeliveryState::Completed);
        assert_eq!(slow.state(), DeliveryState::Scheduled);

        assert!(slow.cancel());
        assert_eq!(slow.finished().await, DeliveryState::Cancelled);
        assert_eq!(fast_sink.signals().last(), Some(&Signal::Complete));
        assert_eq!(slow_sink.signals(), vec![Signal::Error(DeliveryError::Cancelled)]);
    }

    #[tokio::test]
    async fn test_session_routes_without_install() {
        let stub = RequestStub::new();
        stub.add_exact_rule("https://example.com/hello", MockResponse::success("hello"));
        let session = stub.session();

        assert!(!stub.should_intercept(&Request::get("https://example.com/hello")));
        assert!(session.should_intercept(&Request::get("https://example.com/hello")));

        let sink = RecordingSink::new();
        let handle = session
            .send(&Request::get("https://example.com/hello"), sink.clone())
            .unwrap();
        assert_eq!(handle.finished().await, DeliveryState::Completed);
        assert_eq!(sink.signals()[1], Signal::Body(b"hello".to_vec()));

        let err = session
            .send(&Request::get("https://example.com/missing"), RecordingSink::new())
            .unwrap_err();
        assert!(matches!(err, StubError::Unmatched(url) if url == "https://example.com/missing"));
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = StubConfig::from_yaml(crate::config::EXAMPLE_CONFIG).unwrap();
        let stub = RequestStub::from_config(&config).unwrap();
        stub.install();
        assert_eq!(stub.rule_count(), 3);

        let result = stub
            .find_match(&Request::get("https://offline.example.com/anything"))
            .unwrap();
        assert_eq!(result.source.to_string(), "offline");

        let sink = RecordingSink::new();
        let handle = stub
            .intercept(&Request::get("https://offline.example.com/anything"), sink.clone())
            .unwrap()
            .unwrap();
        assert_eq!(handle.finished().await, DeliveryState::Failed);
        assert_eq!(
            sink.signals().last(),
            Some(&Signal::Error(DeliveryError::Simulated(
                crate::error::SimulatedError::new(ErrorCode::NotConnectedToInternet)
                    .with_message("The Internet connection appears to be offline.")
            )))
        );
    }

    #[test]
    fn test_intercept_without_runtime() {
        let stub = installed_stub();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();

        let err = stub
            .intercept(&Request::get("https://example.com/hello"), RecordingSink::new())
            .unwrap_err();
        assert!(matches!(err, StubError::NoRuntime));
    }

    #[test]
    fn test_failed_claim_is_not_observed() {
        let stub = installed_stub();
        stub.add_regex_rule(".*", MockResponse::success(Vec::new())).unwrap();

        let seen = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&seen);
        stub.set_observer(Some(Arc::new(move |_: &Request| *count.lock() += 1)));

        let err = stub
            .intercept(&Request::get("https://example.com/hello"), RecordingSink::new())
            .unwrap_err();
        assert!(matches!(err, StubError::NoRuntime));
        assert_eq!(*seen.lock(), 0);
        assert_eq!(stub.stats(), StatsSnapshot::default());
    }
}
