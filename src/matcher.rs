//! Request matching logic.
//!
//! Matches requests against the ordered rule set. A dynamic rule, when set,
//! is consulted first; pattern rules are then tried in insertion order and
//! the first one whose pattern accepts the request URL wins.

use crate::error::StubError;
use crate::request::Request;
use crate::response::MockResponse;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// A URL pattern.
#[derive(Clone)]
pub enum Pattern {
    /// Case-sensitive equality with the URL string, no normalization.
    Exact(String),
    /// Regular expression that must match the whole URL string.
    Regex(WholeMatch),
}

impl Pattern {
    pub fn exact(url: impl Into<String>) -> Self {
        Pattern::Exact(url.into())
    }

    /// Compile a whole-string regex pattern.
    pub fn regex(pattern: &str) -> Result<Self, StubError> {
        WholeMatch::new(pattern).map(Pattern::Regex)
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Pattern::Exact(value) => url == value,
            Pattern::Regex(regex) => regex.is_match(url),
        }
    }

    /// The pattern as written by the caller.
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(value) => value,
            Pattern::Regex(regex) => regex.as_str(),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(value) => f.debug_tuple("Exact").field(value).finish(),
            Pattern::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
        }
    }
}

/// A regex anchored at both ends.
#[derive(Clone)]
pub struct WholeMatch {
    source: String,
    anchored: Regex,
}

impl WholeMatch {
    fn new(pattern: &str) -> Result<Self, StubError> {
        let malformed = |source| StubError::MalformedPattern {
            pattern: pattern.to_string(),
            source,
        };
        // The raw pattern must compile on its own so the anchoring group
        // below cannot change how it parses.
        Regex::new(pattern).map_err(malformed)?;
        let anchored = Regex::new(&format!(r"\A(?:{})\z", pattern)).map_err(malformed)?;

        Ok(Self {
            source: pattern.to_string(),
            anchored,
        })
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.anchored.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// A rule computed from the request itself.
///
/// Returning `None` falls through to the pattern rules. A rule may hand out
/// one shared response for many requests.
pub trait DynamicRule: Send + Sync {
    fn evaluate(&self, request: &Request) -> Option<Arc<MockResponse>>;
}

/// Closures may return either `MockResponse` or `Arc<MockResponse>`.
impl<F, R> DynamicRule for F
where
    F: Fn(&Request) -> Option<R> + Send + Sync,
    R: Into<Arc<MockResponse>>,
{
    fn evaluate(&self, request: &Request) -> Option<Arc<MockResponse>> {
        self(request).map(Into::into)
    }
}

/// A pattern paired with the response it yields.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Identifier for logs, set for rules loaded from configuration.
    pub id: Option<String>,
    pub pattern: Pattern,
    pub response: Arc<MockResponse>,
}

/// Which rule produced a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSource {
    Dynamic,
    Pattern { index: usize, id: Option<String> },
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSource::Dynamic => f.write_str("dynamic"),
            MatchSource::Pattern { id: Some(id), .. } => f.write_str(id),
            MatchSource::Pattern { index, id: None } => write!(f, "#{}", index),
        }
    }
}

/// Result of matching a request against the rule set.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub source: MatchSource,
    pub response: Arc<MockResponse>,
}

/// Ordered pattern rules plus an optional dynamic rule.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<PatternRule>,
    dynamic: Option<Arc<dyn DynamicRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern rule. Duplicates are kept.
    pub fn add(&mut self, pattern: Pattern, response: impl Into<Arc<MockResponse>>) {
        self.push(PatternRule {
            id: None,
            pattern,
            response: response.into(),
        });
    }

    pub fn push(&mut self, rule: PatternRule) {
        self.rules.push(rule);
    }

    /// Replace the dynamic rule slot. `None` clears it.
    pub fn set_dynamic(&mut self, rule: Option<Arc<dyn DynamicRule>>) {
        self.dynamic = rule;
    }

    pub fn has_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.dynamic.is_none()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.dynamic = None;
    }

    /// Find the response for a request.
    pub fn find_match(&self, request: &Request) -> Option<MatchResult> {
        if let Some(response) = self.dynamic.as_ref().and_then(|rule| rule.evaluate(request)) {
            return Some(MatchResult {
                source: MatchSource::Dynamic,
                response,
            });
        }

        let Some(url) = request.url() else {
            error!(method = %request.method(), "Request has no resolvable URL, treating as unmatched");
            return None;
        };

        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern.matches(url))
            .map(|(index, rule)| MatchResult {
                source: MatchSource::Pattern {
                    index,
                    id: rule.id.clone(),
                },
                response: Arc::clone(&rule.response),
            })
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rules)
            .field("dynamic", &self.dynamic.is_some())
            .finish()
    }
}
