use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LogingestError, Result};
use crate::types::{DEFAULT_EVENT_TYPE, DEFAULT_PRODUCT, DEFAULT_SEVERITY};

pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 3;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 300;
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const ENV_PREFIX: &str = "LOGINGEST_";

/// Candidate locations probed when no explicit path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &["/app/config/config.yaml", "config/config.yaml"];

/// `${VAR}` or `${VAR:-default}`.
static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(\w+)(?::-(.*?))?\}").expect("env reference pattern is valid")
});

/// Top-level config (config.yaml + LOGINGEST_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogingestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database settings. The embedded store only uses `name`/`path`; the
/// network fields are accepted so existing deployments keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: Option<String>,
    #[serde(default = "default_db_port")]
    pub port: Option<u16>,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: Option<String>,
    #[serde(default = "default_db_password")]
    pub password: Option<String>,
    /// Explicit database file. Falls back to `<name>.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_password(),
            path: None,
        }
    }
}

impl DatabaseConfig {
    /// File the embedded store opens.
    pub fn store_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(format!("{}.db", self.name)),
        }
    }

    /// True when network connection settings were supplied.
    pub fn has_network_settings(&self) -> bool {
        self.host.is_some() || self.port.is_some() || self.user.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone name cron expressions are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    /// Interval of the periodic status log line; 0 disables it.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
        }
    }
}

/// One configured data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Connector type tag, e.g. `http_json`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Five-field cron expression.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Query-string parameters sent with every fetch.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Item field holding an RFC 3339 timestamp.
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// Overlapping executions allowed for this source (default 1).
    #[serde(default)]
    pub max_instances: Option<usize>,
    #[serde(default)]
    pub misfire_grace_secs: Option<u64>,
}

impl SourceConfig {
    /// Minimal enabled source, mostly useful in tests.
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(kind.to_string()),
            endpoint: None,
            schedule: None,
            enabled: true,
            product: default_product(),
            event_type: default_event_type(),
            severity: default_severity(),
            params: BTreeMap::new(),
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            timestamp_field: None,
            max_instances: None,
            misfire_grace_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file; rotated daily.
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: default_log_file(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_db_host() -> Option<String> {
    std::env::var("DB_HOST").ok()
}
fn default_db_port() -> Option<u16> {
    std::env::var("DB_PORT").ok().and_then(|p| p.parse().ok())
}
fn default_db_name() -> String {
    std::env::var("DB_NAME").unwrap_or_else(|_| "logingest".to_string())
}
fn default_db_user() -> Option<String> {
    std::env::var("DB_USER").ok()
}
fn default_db_password() -> Option<String> {
    std::env::var("DB_PASSWORD").ok()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_max_parallel_jobs() -> usize {
    DEFAULT_MAX_PARALLEL_JOBS
}
fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_status_interval_secs() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}
fn default_product() -> String {
    DEFAULT_PRODUCT.to_string()
}
fn default_event_type() -> String {
    DEFAULT_EVENT_TYPE.to_string()
}
fn default_severity() -> String {
    DEFAULT_SEVERITY.to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}
fn default_log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}
fn default_log_file() -> Option<String> {
    std::env::var("LOG_FILE").ok()
}

impl LogingestConfig {
    /// Load config from a YAML file with `${VAR}` substitution and
    /// LOGINGEST_* env var overrides (`__` separates nested keys).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LogingestError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(path = %path.display(), sources = config.sources.len(), "configuration loaded");
        Ok(config)
    }

    /// Parse a YAML document after env substitution.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let content = substitute_env(raw);
        let config: LogingestConfig = Figment::new()
            .merge(Yaml::string(&content))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| LogingestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_parallel_jobs == 0 {
            return Err(LogingestError::Config(
                "scheduler.max_parallel_jobs must be at least 1".to_string(),
            ));
        }
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(LogingestError::Config(
                    "every source needs a non-empty name".to_string(),
                ));
            }
            if source.max_instances == Some(0) {
                return Err(LogingestError::Config(format!(
                    "source '{}': max_instances must be at least 1",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// Replace `${VAR}` / `${VAR:-default}` with values from the process
/// environment. Unset variables without a default become empty strings.
pub fn substitute_env(content: &str) -> String {
    ENV_REF
        .replace_all(content, |caps: &Captures<'_>| {
            let default = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

/// Load variables from a `.env` file if it exists. Existing process
/// variables are never overwritten.
pub fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>> {
    let path = path.unwrap_or_else(|| Path::new(".env"));
    if !path.exists() {
        return Ok(None);
    }
    dotenvy::from_path(path).map_err(|e| LogingestError::Config(e.to_string()))?;
    Ok(Some(path.to_path_buf()))
}

/// Resolve the config file: explicit path > LOGINGEST_CONFIG > well-known
/// locations. Returns the last candidate when none exist so the caller can
/// report a useful "not found" path.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var(format!("{ENV_PREFIX}CONFIG")) {
        return PathBuf::from(p);
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[DEFAULT_CONFIG_PATHS.len() - 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
database:
  name: ingest_test
scheduler:
  timezone: Europe/Berlin
  max_parallel_jobs: 2
sources:
  - name: posts
    type: json_placeholder
    endpoint: ${LOGINGEST_TEST_ENDPOINT:-https://jsonplaceholder.typicode.com/posts}
    schedule: "*/5 * * * *"
    product: demo
    params:
      userId: 1
  - name: disabled
    type: http_json
    enabled: false
"#;

    #[test]
    fn parses_sources_with_defaults() {
        let config = LogingestConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.scheduler.max_parallel_jobs, 2);
        assert_eq!(config.scheduler.timezone, "Europe/Berlin");
        assert_eq!(config.scheduler.misfire_grace_secs, DEFAULT_MISFIRE_GRACE_SECS);
        assert_eq!(config.sources.len(), 2);

        let posts = &config.sources[0];
        assert_eq!(posts.kind.as_deref(), Some("json_placeholder"));
        assert_eq!(posts.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(posts.event_type, DEFAULT_EVENT_TYPE);
        assert_eq!(posts.params["userId"], serde_json::json!(1));
        assert!(posts.enabled);
        assert!(!config.sources[1].enabled);
        assert_eq!(config.database.store_path(), PathBuf::from("ingest_test.db"));
    }

    #[test]
    fn substitution_uses_default_when_unset() {
        let out = substitute_env("url: ${LOGINGEST_SURELY_UNSET_VAR:-http://fallback}");
        assert_eq!(out, "url: http://fallback");
    }

    #[test]
    fn substitution_prefers_environment() {
        std::env::set_var("LOGINGEST_SUBST_PRESENT", "from-env");
        let out = substitute_env("a: ${LOGINGEST_SUBST_PRESENT:-nope}, b: ${LOGINGEST_SUBST_PRESENT}");
        assert_eq!(out, "a: from-env, b: from-env");
    }

    #[test]
    fn substitution_without_default_is_empty() {
        assert_eq!(substitute_env("x=${LOGINGEST_NEVER_SET_EITHER}"), "x=");
    }

    #[test]
    fn zero_parallel_jobs_rejected() {
        let err = LogingestConfig::from_yaml_str("scheduler:\n  max_parallel_jobs: 0\n").unwrap_err();
        assert!(matches!(err, LogingestError::Config(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LogingestConfig::load(Path::new("/nonexistent/logingest.yaml")).unwrap_err();
        assert!(matches!(err, LogingestError::ConfigNotFound { .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = LogingestConfig::load(file.path()).unwrap();
        assert_eq!(config.sources[0].name, "posts");
    }

    #[test]
    fn explicit_path_wins() {
        let p = resolve_config_path(Some(Path::new("/tmp/custom.yaml")));
        assert_eq!(p, PathBuf::from("/tmp/custom.yaml"));
    }

    #[test]
    fn config_env_var_then_default_locations() {
        std::env::set_var("LOGINGEST_CONFIG", "/srv/logingest/from-env.yaml");
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/srv/logingest/from-env.yaml")
        );
        std::env::remove_var("LOGINGEST_CONFIG");

        let fallback = resolve_config_path(None);
        assert!(
            DEFAULT_CONFIG_PATHS.iter().any(|p| fallback == Path::new(p)),
            "{}",
            fallback.display()
        );
    }

    #[test]
    fn prefixed_env_overrides_nested_yaml_keys() {
        std::env::set_var("LOGINGEST_SCHEDULER__STATUS_INTERVAL_SECS", "17");
        let config =
            LogingestConfig::from_yaml_str("scheduler:\n  status_interval_secs: 60\n").unwrap();
        std::env::remove_var("LOGINGEST_SCHEDULER__STATUS_INTERVAL_SECS");
        assert_eq!(config.scheduler.status_interval_secs, 17);
    }

    #[test]
    fn dotenv_loads_without_overwriting() {
        std::env::set_var("LOGINGEST_DOTENV_KEPT", "from-process");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LOGINGEST_DOTENV_FRESH=from-file").unwrap();
        writeln!(file, "LOGINGEST_DOTENV_KEPT=from-file").unwrap();

        let loaded = load_dotenv(Some(file.path())).unwrap();
        assert_eq!(loaded.as_deref(), Some(file.path()));
        assert_eq!(std::env::var("LOGINGEST_DOTENV_FRESH").unwrap(), "from-file");
        assert_eq!(std::env::var("LOGINGEST_DOTENV_KEPT").unwrap(), "from-process");
    }

    #[test]
    fn missing_dotenv_is_not_an_error() {
        let loaded = load_dotenv(Some(Path::new("/nonexistent/logingest.env"))).unwrap();
        assert!(loaded.is_none());
    }
}
