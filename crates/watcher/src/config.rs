use std::time::Duration;

/// Default base polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;

/// Default upper bound for one status request in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Watcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Base HTTP URL of the audit API, e.g. `http://host:8000/api`.
    pub api_url: String,
    /// Push-channel endpoint, e.g. `ws://host:8000/ws`.
    pub ws_url: String,
    /// Base polling interval for every tracked audit.
    pub poll_interval: Duration,
    /// Upper bound for a single status request.
    pub request_timeout: Duration,
    /// Audits to track at startup.
    pub audit_ids: Vec<String>,
}

/// Errors from [`WatchConfig::from_env`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} must be a positive integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl WatchConfig {
    /// Configuration with defaults for everything except the endpoints.
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            audit_ids: Vec::new(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                | Required | Default |
    /// |------------------------|----------|---------|
    /// | `AUDIT_API_URL`        | yes      | --      |
    /// | `AUDIT_WS_URL`         | yes      | --      |
    /// | `POLL_INTERVAL_MS`     | no       | `15000` |
    /// | `REQUEST_TIMEOUT_SECS` | no       | `30`    |
    /// | `AUDIT_IDS`            | no       | empty   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let positive = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            let Some(raw) = lookup(var) else {
                return Ok(default);
            };
            match raw.trim().parse::<u64>() {
                Ok(value) if value > 0 => Ok(value),
                _ => Err(ConfigError::Invalid { var, value: raw }),
            }
        };

        let api_url = required("AUDIT_API_URL")?;
        let ws_url = required("AUDIT_WS_URL")?;
        let poll_interval_ms = positive("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let request_timeout_secs = positive("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let audit_ids: Vec<String> = lookup("AUDIT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            api_url,
            ws_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            audit_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let config = WatchConfig::from_lookup(lookup(&[
            ("AUDIT_API_URL", "http://localhost:8000/api"),
            ("AUDIT_WS_URL", "ws://localhost:8000/ws"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "http://localhost:8000/api");
        assert_eq!(config.ws_url, "ws://localhost:8000/ws");
        assert_eq!(config.poll_interval, Duration::from_millis(15_000));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.audit_ids.is_empty());
    }

    #[test]
    fn audit_ids_are_split_and_trimmed() {
        let config = WatchConfig::from_lookup(lookup(&[
            ("AUDIT_API_URL", "http://a"),
            ("AUDIT_WS_URL", "ws://a"),
            ("AUDIT_IDS", " a1, ,a2 ,"),
            ("POLL_INTERVAL_MS", "2000"),
        ]))
        .unwrap();

        assert_eq!(config.audit_ids, vec!["a1", "a2"]);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let err = WatchConfig::from_lookup(lookup(&[("AUDIT_WS_URL", "ws://a")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("AUDIT_API_URL"));

        let err = WatchConfig::from_lookup(lookup(&[
            ("AUDIT_API_URL", "http://a"),
            ("AUDIT_WS_URL", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("AUDIT_WS_URL"));
    }

    #[test]
    fn zero_or_garbage_interval_is_rejected() {
        for bad in ["0", "soon"] {
            let err = WatchConfig::from_lookup(lookup(&[
                ("AUDIT_API_URL", "http://a"),
                ("AUDIT_WS_URL", "ws://a"),
                ("POLL_INTERVAL_MS", bad),
            ]))
            .unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    var: "POLL_INTERVAL_MS",
                    value: bad.to_string()
                }
            );
        }
    }
}
