use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::ServiceKey;
use crate::util;

const API_KEY_PLACEHOLDER: &str = "{{API_KEY}}";

const INCLUDE_PREFIX: &str = "!include ";

const INCLUDE_DIR: &str = "data";

const MAX_SLUG_LEN: usize = 100;

const DEFAULT_MAX_CONCURRENCY: i32 = 10;

const DEFAULT_QUERY_LIMIT: usize = 10;

const DEFAULT_DEGRADED_WEIGHT: f64 = 0.7;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid slug regex"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Probe records older than this are deleted by the retention task
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitor.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTarget {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

impl AlertTarget {
    pub fn url(&self) -> &str {
        match self {
            AlertTarget::Discord(discord) => &discord.url,
            AlertTarget::Webhook(webhook) => &webhook.url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Number of consecutive failures that raise a `continuous_down` alert.
    /// Zero selects the default of 3.
    #[serde(default)]
    pub continuous_failure_threshold: u32,

    /// Seconds between two alerts of the same series. Zero selects the default of 300.
    #[serde(default = "default_min_notify_interval")]
    pub min_notify_interval: u64,

    /// Idle hours after which alert state of a healthy series is dropped.
    /// Zero selects the default of 24.
    #[serde(default = "default_state_retention_hours")]
    pub state_retention_hours: u64,

    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default)]
    pub targets: Vec<AlertTarget>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            continuous_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            min_notify_interval: default_min_notify_interval(),
            state_retention_hours: default_state_retention_hours(),
            timeout_secs: default_notify_timeout(),
            retry_count: default_retry_count(),
            targets: vec![],
        }
    }
}

impl NotifierConfig {
    pub fn min_notify_interval(&self) -> Duration {
        Duration::from_secs(self.min_notify_interval)
    }

    pub fn state_retention(&self) -> Duration {
        Duration::from_secs(self.state_retention_hours * 3600)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_min_notify_interval() -> u64 {
    300
}

fn default_state_retention_hours() -> u64 {
    24
}

fn default_notify_timeout() -> u64 {
    5
}

fn default_retry_count() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Commercial,
    Public,
}

/// One monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub provider: String,
    #[serde(default)]
    pub provider_slug: String,
    #[serde(default)]
    pub provider_url: Option<String>,
    pub service: String,
    pub category: Category,
    pub sponsor: String,
    #[serde(default)]
    pub sponsor_url: Option<String>,
    #[serde(default)]
    pub channel: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Substring the response body must contain for a 2xx to count as healthy.
    #[serde(default)]
    pub success_contains: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    /// Per-monitor override of the global slow latency threshold
    #[serde(default)]
    pub slow_latency_ms: Option<u64>,
}

fn default_probe_timeout() -> u64 {
    10
}

impl ServiceConfig {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.provider, &self.service, &self.channel)
    }

    /// Latency above which a successful probe counts as degraded.
    pub fn slow_latency(&self) -> Duration {
        Duration::from_millis(self.slow_latency_ms.unwrap_or(default_slow_latency()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Legacy records without a channel belong to this channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub provider: String,
    pub service: String,
    pub channel: String,
}

/// Validated configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between two probing rounds
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_slow_latency")]
    pub slow_latency_ms: u64,

    /// Availability credit of a degraded probe, in (0, 1]
    #[serde(default)]
    pub degraded_weight: f64,

    /// 0 selects the default, -1 means one slot per monitor
    #[serde(default)]
    pub max_concurrency: i32,

    #[serde(default = "default_true")]
    pub stagger_probes: bool,

    #[serde(default)]
    pub enable_concurrent_query: bool,

    #[serde(default)]
    pub concurrent_query_limit: usize,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub api: ApiSettings,

    pub monitors: Vec<ServiceConfig>,
}

fn default_interval() -> u64 {
    60
}

fn default_slow_latency() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load, normalize and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&content, base_dir, util::env_var)
    }

    /// Build a snapshot from raw JSON. `lookup` resolves environment overrides.
    pub fn from_json(
        content: &str,
        base_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_json::from_str(content)?;
        config.apply_env_overrides(lookup);
        config.resolve_includes(base_dir)?;
        config.normalize();
        config.validate()?;
        config.apply_placeholders();
        trace!("loaded config: {} monitors", config.monitors.len());
        Ok(config)
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn slow_latency(&self) -> Duration {
        Duration::from_millis(self.slow_latency_ms)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(util::sqlite_path_var()) {
            if let StorageConfig::Sqlite { path: current, .. } = &mut self.storage {
                debug!("sqlite path overridden from environment");
                *current = PathBuf::from(path);
            }
        }

        for monitor in &mut self.monitors {
            if let Some(key) = lookup(&util::api_key_var(&monitor.provider, &monitor.service)) {
                monitor.api_key = Some(key);
            }
        }
    }

    fn resolve_includes(&mut self, base_dir: &Path) -> Result<(), ConfigError> {
        for monitor in &mut self.monitors {
            let Some(body) = &monitor.body else {
                continue;
            };
            let Some(reference) = body.trim().strip_prefix(INCLUDE_PREFIX) else {
                continue;
            };

            let relative = Path::new(reference.trim());
            let escapes = relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if escapes || !relative.starts_with(INCLUDE_DIR) {
                return Err(invalid(format!(
                    "{}: body include must point into {INCLUDE_DIR}/, got {}",
                    monitor.key(),
                    relative.display()
                )));
            }

            let path = base_dir.join(relative);
            let content =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
            monitor.body = Some(content);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        if self.degraded_weight == 0.0 {
            self.degraded_weight = DEFAULT_DEGRADED_WEIGHT;
        }
        if self.max_concurrency == 0 {
            self.max_concurrency = DEFAULT_MAX_CONCURRENCY;
        }
        if self.concurrent_query_limit == 0 {
            self.concurrent_query_limit = DEFAULT_QUERY_LIMIT;
        }
        if self.notifier.continuous_failure_threshold == 0 {
            self.notifier.continuous_failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if self.notifier.timeout_secs == 0 {
            self.notifier.timeout_secs = default_notify_timeout();
        }
        if self.notifier.min_notify_interval == 0 {
            self.notifier.min_notify_interval = default_min_notify_interval();
        }
        if self.notifier.state_retention_hours == 0 {
            self.notifier.state_retention_hours = default_state_retention_hours();
        }

        for monitor in &mut self.monitors {
            monitor.provider = monitor.provider.trim().to_string();
            monitor.service = monitor.service.trim().to_string();
            monitor.channel = monitor.channel.trim().to_string();
            monitor.provider_slug = monitor.provider_slug.trim().to_string();
            if monitor.provider_slug.is_empty() {
                monitor.provider_slug = slugify(&monitor.provider);
            }
            if monitor.slow_latency_ms.is_none() {
                monitor.slow_latency_ms = Some(self.slow_latency_ms);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(invalid("interval must be positive"));
        }
        if !(self.degraded_weight > 0.0 && self.degraded_weight <= 1.0) {
            return Err(invalid(format!(
                "degraded_weight must lie in (0, 1], got {}",
                self.degraded_weight
            )));
        }
        if self.max_concurrency < -1 {
            return Err(invalid(format!(
                "max_concurrency must be -1, 0 or positive, got {}",
                self.max_concurrency
            )));
        }
        if let StorageConfig::Sqlite { path, .. } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(invalid("sqlite path must not be empty"));
            }
        }
        if self.notifier.enabled {
            for target in &self.notifier.targets {
                validate_url(target.url()).map_err(|e| invalid(format!("alert target: {e}")))?;
            }
        }

        if self.monitors.is_empty() {
            return Err(invalid("at least one monitor must be configured"));
        }

        let mut seen = HashSet::new();
        for (idx, monitor) in self.monitors.iter().enumerate() {
            if monitor.provider.is_empty() {
                return Err(invalid(format!("monitor[{idx}]: provider is required")));
            }
            if monitor.service.is_empty() {
                return Err(invalid(format!("monitor[{idx}]: service is required")));
            }
            if monitor.sponsor.trim().is_empty() {
                return Err(invalid(format!("monitor[{idx}]: sponsor is required")));
            }
            validate_url(&monitor.url).map_err(|e| invalid(format!("monitor[{idx}]: {e}")))?;
            validate_slug(&monitor.provider_slug)
                .map_err(|e| invalid(format!("monitor[{idx}]: {e}")))?;

            if !seen.insert(monitor.key()) {
                return Err(invalid(format!("duplicate monitor {}", monitor.key())));
            }
        }
        Ok(())
    }

    fn apply_placeholders(&mut self) {
        for monitor in &mut self.monitors {
            let Some(key) = monitor.api_key.clone().filter(|k| !k.is_empty()) else {
                continue;
            };
            for value in monitor.headers.values_mut() {
                if value.contains(API_KEY_PLACEHOLDER) {
                    *value = value.replace(API_KEY_PLACEHOLDER, &key);
                }
            }
            if let Some(body) = &mut monitor.body {
                if body.contains(API_KEY_PLACEHOLDER) {
                    *body = body.replace(API_KEY_PLACEHOLDER, &key);
                }
            }
        }
    }

    /// First non-empty channel configured for every provider/service pair.
    pub fn channel_mappings(&self) -> Vec<ChannelMapping> {
        let mut seen = HashSet::new();
        self.monitors
            .iter()
            .filter(|m| !m.channel.is_empty())
            .filter(|m| seen.insert((m.provider.clone(), m.service.clone())))
            .map(|m| ChannelMapping {
                provider: m.provider.clone(),
                service: m.service.clone(),
                channel: m.channel.clone(),
            })
            .collect()
    }

    /// Provider name behind a slug, if any monitor uses it.
    pub fn provider_for_slug(&self, slug: &str) -> Option<&str> {
        self.monitors
            .iter()
            .find(|m| m.provider_slug == slug)
            .map(|m| m.provider.as_str())
    }
}

fn slugify(provider: &str) -> String {
    let mut slug = String::with_capacity(provider.len());
    for c in provider.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("provider_slug must not be empty".to_string());
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(format!("provider_slug longer than {MAX_SLUG_LEN} characters"));
    }
    if !SLUG_PATTERN.is_match(slug) {
        return Err(format!(
            "provider_slug '{slug}' may only contain lowercase letters, digits and single hyphens"
        ));
    }
    Ok(())
}

fn validate_url(raw: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(()),
        scheme => Err(format!("unsupported url '{raw}' (scheme {scheme})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn monitor(provider: &str, service: &str, channel: &str) -> serde_json::Value {
        json!({
            "provider": provider,
            "service": service,
            "channel": channel,
            "category": "commercial",
            "sponsor": "someone",
            "url": "https://api.example.com/v1/chat",
        })
    }

    fn parse(value: serde_json::Value) -> Result<AppConfig, ConfigError> {
        AppConfig::from_json(&value.to_string(), Path::new("."), |_| None)
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = parse(json!({ "monitors": [monitor("Acme Relay", "chat", "")] })).unwrap();

        assert_eq!(config.interval, 60);
        assert_eq!(config.slow_latency_ms, 5000);
        assert_eq!(config.degraded_weight, 0.7);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.concurrent_query_limit, 10);
        assert!(config.stagger_probes);
        assert_eq!(config.notifier.continuous_failure_threshold, 3);
        assert_eq!(config.notifier.min_notify_interval, 300);
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.monitors[0].provider_slug, "acme-relay");
        assert_eq!(config.monitors[0].method, HttpMethod::Get);
        assert_eq!(config.monitors[0].slow_latency(), Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_notifier_timings_select_defaults() {
        let config = parse(json!({
            "notifier": { "min_notify_interval": 0, "state_retention_hours": 0 },
            "monitors": [monitor("Acme Relay", "chat", "")],
        }))
        .unwrap();

        assert_eq!(config.notifier.min_notify_interval, 300);
        assert_eq!(config.notifier.state_retention_hours, 24);
        assert_eq!(config.notifier.min_notify_interval(), Duration::from_secs(300));
        assert_eq!(config.notifier.state_retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_rejects_bad_degraded_weight() {
        let err = parse(json!({ "degraded_weight": 1.5, "monitors": [monitor("a", "b", "")] }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_concurrency() {
        let err = parse(json!({ "max_concurrency": -2, "monitors": [monitor("a", "b", "")] }))
            .unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));

        let config =
            parse(json!({ "max_concurrency": -1, "monitors": [monitor("a", "b", "")] })).unwrap();
        assert_eq!(config.max_concurrency, -1);
    }

    #[test]
    fn test_rejects_duplicate_series() {
        let err = parse(json!({
            "monitors": [monitor("a", "b", "x"), monitor("a", "b", "x")]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        assert!(
            parse(json!({ "monitors": [monitor("a", "b", "x"), monitor("a", "b", "y")] })).is_ok()
        );
    }

    #[test]
    fn test_rejects_invalid_slug() {
        let mut entry = monitor("a", "b", "");
        entry["provider_slug"] = json!("Bad--Slug");
        assert!(parse(json!({ "monitors": [entry] })).is_err());
    }

    #[test]
    fn test_rejects_invalid_url() {
        let mut entry = monitor("a", "b", "");
        entry["url"] = json!("ftp://example.com");
        assert!(parse(json!({ "monitors": [entry] })).is_err());
    }

    #[test]
    fn test_rejects_missing_monitors() {
        assert!(parse(json!({ "monitors": [] })).is_err());
        assert!(matches!(
            parse(json!({ "interval": 5 })),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_and_placeholders() {
        let mut entry = monitor("acme", "chat", "");
        entry["headers"] = json!({ "Authorization": "Bearer {{API_KEY}}" });
        entry["body"] = json!("{\"key\":\"{{API_KEY}}\"}");

        let config = AppConfig::from_json(
            &json!({ "monitors": [entry] }).to_string(),
            Path::new("."),
            |name| match name {
                "MONITOR_ACME_CHAT_API_KEY" => Some("sk-123".to_string()),
                "MONITOR_SQLITE_PATH" => Some("/tmp/other.db".to_string()),
                _ => None,
            },
        )
        .unwrap();

        let monitor = &config.monitors[0];
        assert_eq!(monitor.headers["Authorization"], "Bearer sk-123");
        assert_eq!(monitor.body.as_deref(), Some("{\"key\":\"sk-123\"}"));
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: PathBuf::from("/tmp/other.db"),
                retention_days: 30
            }
        );
    }

    #[test]
    fn test_body_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/payload.json"), "{\"ping\":true}").unwrap();

        let mut entry = monitor("a", "b", "");
        entry["body"] = json!("!include data/payload.json");
        let config = AppConfig::from_json(
            &json!({ "monitors": [entry.clone()] }).to_string(),
            dir.path(),
            |_| None,
        )
        .unwrap();
        assert_eq!(config.monitors[0].body.as_deref(), Some("{\"ping\":true}"));

        entry["body"] = json!("!include ../secret.json");
        assert!(
            AppConfig::from_json(
                &json!({ "monitors": [entry] }).to_string(),
                dir.path(),
                |_| None
            )
            .is_err()
        );
    }

    #[test]
    fn test_channel_mappings_use_first_channel() {
        let config = parse(json!({
            "monitors": [
                monitor("a", "chat", ""),
                monitor("a", "chat", "vip"),
                monitor("a", "chat", "basic"),
                monitor("b", "chat", "main"),
            ]
        }))
        .unwrap();

        let mappings = config.channel_mappings();
        assert_eq!(
            mappings,
            vec![
                ChannelMapping {
                    provider: "a".into(),
                    service: "chat".into(),
                    channel: "vip".into()
                },
                ChannelMapping {
                    provider: "b".into(),
                    service: "chat".into(),
                    channel: "main".into()
                },
            ]
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Open Relay!"), "open-relay");
        assert_eq!(slugify("--A__b--"), "a-b");
        assert!(validate_slug(&slugify("Some Provider 2")).is_ok());
    }
}
