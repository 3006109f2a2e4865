//! Configuration types for the exit node registry.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the exit node registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Exit list endpoints, each serving whitespace-separated addresses.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// How long a fetched list is served before the next query refreshes it (seconds).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Treat a refresh that yields no addresses at all as an error.
    #[serde(default)]
    pub fail_on_empty: bool,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            refresh_interval_seconds: default_refresh_interval(),
            fail_on_empty: false,
            http: HttpConfig::default(),
        }
    }
}

/// HTTP client configuration used for every source request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// `User-Agent` sent with each request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_sources() -> Vec<String> {
    vec![
        "https://check.torproject.org/torbulkexitlist".to_string(),
        "https://www.dan.me.uk/torlist/?exit".to_string(),
    ]
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_timeout() -> u64 {
    3000
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Config {
    /// Create a configuration for the given sources with default settings.
    pub fn with_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("at least one source must be configured");
        }

        for source in &self.sources {
            if let Err(e) = Url::parse(source) {
                anyhow::bail!("Invalid source URL '{}': {}", source, e);
            }
        }

        if self.http.timeout_ms == 0 {
            anyhow::bail!("http.timeout_ms must be greater than zero");
        }

        if self.http.user_agent.trim().is_empty() {
            anyhow::bail!("http.user_agent must not be empty");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        format!(
            r#"# Tor exit node registry configuration

# Exit list endpoints. Each must serve plain text with one address per line
# (any whitespace works as a separator).
sources:
  - "https://check.torproject.org/torbulkexitlist"
  - "https://www.dan.me.uk/torlist/?exit"

# Serve the merged list for this long before refetching (seconds)
refresh_interval_seconds: 3600

# Report an error when every source comes back empty or unreachable
fail_on_empty: false

http:
  timeout_ms: 3000             # per-source request timeout
  user_agent: "{}"
"#,
            default_user_agent()
        )
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
