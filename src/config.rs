//! Configuration for the request stub.
//!
//! Declares URL rules, their simulated responses and global logging settings
//! in YAML. Rules are added to the engine in file order.

use crate::error::{SimulatedError, StubError};
use crate::matcher::{Pattern, PatternRule};
use crate::response::{MockResponse, Outcome, DEFAULT_HTTP_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Annotated example rule file, printed by `--print-config`.
pub const EXAMPLE_CONFIG: &str = r#"# Request stub rules. The first matching rule wins.
settings:
  log_matches: true
  log_unmatched: true

rules:
  - id: hello
    url:
      type: exact
      value: https://example.com/hello
    response:
      status: 200
      body:
        type: json
        content:
          message: "Hello, World!"

  - id: slow-users
    url:
      type: regex
      pattern: 'https://api\.example\.com/users/\d+'
    response:
      status: 200
      body:
        type: text
        content: "user"
    delay:
      min_ms: 50
      max_ms: 150

  - id: offline
    url:
      type: regex
      pattern: 'https://offline\.example\.com/.*'
    failure:
      code: not_connected_to_internet
      message: "The Internet connection appears to be offline."
"#;

/// Main configuration for the request stub.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubConfig {
    /// Rule definitions, tried in order
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl StubConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| anyhow::anyhow!("Rule {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Enabled rules, compiled.
    pub fn compile(&self) -> Result<Vec<PatternRule>, StubError> {
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .map(RuleDefinition::to_rule)
            .collect()
    }
}

/// A single rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// Identifier used in logs
    pub id: String,

    /// Optional name/description
    #[serde(default)]
    pub name: Option<String>,

    /// URL pattern
    pub url: UrlMatcher,

    /// Successful response to return
    #[serde(default)]
    pub response: ResponseDefinition,

    /// Fail the request with this error instead of delivering a body
    #[serde(default)]
    pub failure: Option<SimulatedError>,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,

    /// Whether this rule is loaded
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RuleDefinition {
    /// Validate the rule definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Rule id cannot be empty");
        }
        self.url.validate()?;
        self.response.validate()?;
        if self.failure.is_some() && self.response.body.is_some() {
            anyhow::bail!("Rule '{}' sets both a response body and a failure", self.id);
        }
        if let Some(delay) = &self.delay {
            delay.validate()?;
        }
        Ok(())
    }

    /// Compile into a pattern rule with a fixed response.
    ///
    /// A ranged delay is resolved here, once, so the response stays immutable.
    pub fn to_rule(&self) -> Result<PatternRule, StubError> {
        let pattern = self.url.compile()?;

        let outcome = match &self.failure {
            Some(error) => Outcome::Failure(error.clone()),
            None => Outcome::Success(self.response.body_bytes()?),
        };

        let response = MockResponse {
            status: self.response.status,
            http_version: self.response.http_version.clone(),
            headers: self.response.effective_headers(),
            outcome,
            delay: self
                .delay
                .as_ref()
                .map(|d| Duration::from_millis(d.calculate()))
                .filter(|d| !d.is_zero()),
        };

        Ok(PatternRule {
            id: Some(self.id.clone()),
            pattern,
            response: Arc::new(response),
        })
    }
}

/// URL matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UrlMatcher {
    /// Exact URL string match
    Exact { value: String },
    /// Regex that must match the whole URL
    Regex { pattern: String },
}

impl UrlMatcher {
    /// Validate the URL matcher.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.compile()?;
        Ok(())
    }

    pub fn compile(&self) -> Result<Pattern, StubError> {
        match self {
            UrlMatcher::Exact { value } => Ok(Pattern::exact(value.clone())),
            UrlMatcher::Regex { pattern } => Pattern::regex(pattern),
        }
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// HTTP version reported in the response metadata
    #[serde(default = "default_http_version")]
    pub http_version: String,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,
}

fn default_status() -> u16 {
    200
}

fn default_http_version() -> String {
    DEFAULT_HTTP_VERSION.to_string()
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            http_version: default_http_version(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        // 999 is what failure responses report.
        if self.status < 100 || self.status > 999 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        Ok(())
    }

    fn body_bytes(&self) -> Result<Vec<u8>, StubError> {
        match &self.body {
            Some(body) => body.to_bytes().map_err(|e| StubError::Config(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Configured headers plus a Content-Type derived from the body kind.
    fn effective_headers(&self) -> Option<HashMap<String, String>> {
        let mut headers = self.headers.clone();
        let has_content_type = headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
        if let (false, Some(body)) = (has_content_type, &self.body) {
            headers.insert("Content-Type".to_string(), body.content_type().to_string());
        }
        (!headers.is_empty()).then_some(headers)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } | ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fixed_ms == 0 && self.max_ms != 0 && self.max_ms < self.min_ms {
            anyhow::bail!(
                "Delay max_ms ({}) is below min_ms ({})",
                self.max_ms,
                self.min_ms
            );
        }
        Ok(())
    }

    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log every claimed request
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests no rule claimed
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}
