//! Configuration loading: monitored targets and agent settings.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::db::Target;
use crate::util::{parse_duration, short_id};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed YAML in {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("no valid monitor entries in {path}")]
    Empty { path: String },
    #[error("malformed JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("'configs' key not found in the input JSON")]
    MissingConfigsKey,
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// `monitor:` file layout. Unrecognized fields are ignored.
#[derive(Debug, Deserialize)]
struct MonitorFile {
    #[serde(default)]
    monitor: Vec<MonitorEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MonitorEntry {
    url: Option<String>,
    enabled: Option<bool>,
    interval: Option<String>,
    response_time_threshold: Option<String>,
    certificate_monitoring: Option<bool>,
    certificate_expired_before: Option<String>,
    follow_redirects: Option<bool>,
    max_retries: Option<u32>,
    retry_interval: Option<String>,
    dns_timeout: Option<String>,
    dial_timeout: Option<String>,
    tls_handshake_timeout: Option<String>,
    response_header_timeout: Option<String>,
}

/// Connection settings for the alert sink.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub master_host: String,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: String,
}

/// Load and validate the monitor configuration file.
pub fn load_targets(path: &Path) -> Result<Vec<Target>, ConfigError> {
    let display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    parse_targets(&raw, &display)
}

fn parse_targets(raw: &str, path: &str) -> Result<Vec<Target>, ConfigError> {
    let file: MonitorFile = serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
        path: path.to_string(),
        source,
    })?;

    let mut targets = Vec::new();

    for entry in file.monitor {
        let Some(url) = entry.url.as_deref().and_then(normalize_url) else {
            tracing::warn!("skipping monitor entry without a usable url: {:?}", entry.url);
            continue;
        };

        let mut t = Target {
            id: short_id(),
            url,
            ..Default::default()
        };

        if let Some(v) = entry.enabled {
            t.enabled = v;
        }
        if let Some(s) = &entry.interval {
            t.interval = parse_duration(s, "5m");
        }
        if let Some(s) = &entry.response_time_threshold {
            t.response_time_threshold = parse_duration(s, "30s");
        }
        if let Some(v) = entry.certificate_monitoring {
            t.certificate_monitoring = v;
        }
        if let Some(s) = &entry.certificate_expired_before {
            t.certificate_expired_before = parse_duration(s, "31d");
        }
        if let Some(v) = entry.follow_redirects {
            t.follow_redirects = v;
        }
        if let Some(v) = entry.max_retries {
            t.max_retries = v;
        }
        if let Some(s) = &entry.retry_interval {
            t.retry_interval = parse_duration(s, "60s");
        }
        if let Some(s) = &entry.dns_timeout {
            t.dns_timeout = parse_duration(s, "5s");
        }
        if let Some(s) = &entry.dial_timeout {
            t.dial_timeout = parse_duration(s, "10s");
        }
        if let Some(s) = &entry.tls_handshake_timeout {
            t.tls_handshake_timeout = parse_duration(s, "10s");
        }
        if let Some(s) = &entry.response_header_timeout {
            t.response_header_timeout = parse_duration(s, "20s");
        }

        // A zero cadence would spin the check loop.
        if t.interval.is_zero() {
            tracing::warn!("{} - interval must be positive, using 5m", t.url);
            t.interval = parse_duration("5m", "");
        }
        if t.max_retries > 0 && t.retry_interval.is_zero() {
            tracing::warn!("{} - retry_interval must be positive, using 60s", t.url);
            t.retry_interval = parse_duration("60s", "");
        }

        targets.push(t);
    }

    if targets.is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_string(),
        });
    }

    Ok(targets)
}

/// Load the agent configuration. A missing or broken file disables alert
/// notifications but never blocks monitoring.
pub fn load_agent_config(path: &Path) -> AgentConfig {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                "agent config {} not readable ({}), alert notifications disabled",
                path.display(),
                e
            );
            return AgentConfig::default();
        }
    };

    match serde_yaml::from_str(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(
                "agent config {} is malformed ({}), alert notifications disabled",
                path.display(),
                e
            );
            AgentConfig::default()
        }
    }
}

/// Replace the monitor configuration file from a JSON document of the shape
/// `{"configs": [...]}`. Changes apply on the next start.
pub fn update_monitor_config(path: &Path, json_body: &[u8]) -> Result<(), ConfigError> {
    let value: serde_json::Value = serde_json::from_slice(json_body)?;
    let configs = value.get("configs").ok_or(ConfigError::MissingConfigsKey)?;

    let doc = serde_json::json!({ "monitor": configs });
    let yaml = serde_yaml::to_string(&doc).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })?;

    let display = path.display().to_string();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: display.clone(),
                source,
            })?;
        }
    }
    fs::write(path, yaml).map_err(|source| ConfigError::Write {
        path: display,
        source,
    })
}

/// Normalize a configured URL: default to https, lowercase the host, drop a
/// trailing slash. Returns `None` for values that cannot name a target.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = url::Url::parse(&with_scheme).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;

    let mut normalized = parsed.to_string();
    if parsed.query().is_none() && parsed.fragment().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_minimal_entry_uses_defaults() {
        let targets = parse_targets("monitor:\n  - url: example.com\n", "test.yml").unwrap();
        assert_eq!(targets.len(), 1);

        let t = &targets[0];
        assert_eq!(t.url, "https://example.com");
        assert!(t.enabled);
        assert_eq!(t.interval, Duration::from_secs(300));
        assert_eq!(t.response_time_threshold, Duration::from_secs(30));
        assert!(!t.certificate_monitoring);
        assert_eq!(t.certificate_expired_before, Duration::from_secs(31 * 86_400));
        assert!(t.follow_redirects);
        assert_eq!(t.max_retries, 3);
        assert_eq!(t.retry_interval, Duration::from_secs(60));
        assert_eq!(t.dns_timeout, Duration::from_secs(5));
        assert_eq!(t.dial_timeout, Duration::from_secs(10));
        assert_eq!(t.tls_handshake_timeout, Duration::from_secs(10));
        assert_eq!(t.response_header_timeout, Duration::from_secs(20));
        assert_eq!(t.id.len(), 8);
    }

    #[test]
    fn test_parse_full_entry() {
        let yaml = "\
monitor:
  - url: HTTP://Example.COM/status/
    enabled: false
    interval: 30s
    response_time_threshold: 2s
    certificate_monitoring: true
    certificate_expired_before: 14d
    follow_redirects: false
    max_retries: 5
    retry_interval: 10s
    dns_timeout: 1s
    dial_timeout: 2s
    tls_handshake_timeout: 3s
    response_header_timeout: 4s
    some_future_knob: ignored
";
        let targets = parse_targets(yaml, "test.yml").unwrap();
        let t = &targets[0];

        assert_eq!(t.url, "http://example.com/status");
        assert!(!t.enabled);
        assert_eq!(t.interval, Duration::from_secs(30));
        assert_eq!(t.response_time_threshold, Duration::from_secs(2));
        assert!(t.certificate_monitoring);
        assert_eq!(t.certificate_expired_before, Duration::from_secs(14 * 86_400));
        assert!(!t.follow_redirects);
        assert_eq!(t.max_retries, 5);
        assert_eq!(t.retry_interval, Duration::from_secs(10));
        assert_eq!(t.dns_timeout, Duration::from_secs(1));
        assert_eq!(t.dial_timeout, Duration::from_secs(2));
        assert_eq!(t.tls_handshake_timeout, Duration::from_secs(3));
        assert_eq!(t.response_header_timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_invalid_durations_fall_back() {
        let yaml = "monitor:\n  - url: example.com\n    interval: soonish\n    retry_interval: 0s\n";
        let targets = parse_targets(yaml, "test.yml").unwrap();
        let t = &targets[0];
        assert_eq!(t.interval, Duration::from_secs(300));
        // max_retries defaults to 3, so a zero retry interval is clamped.
        assert_eq!(t.retry_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_entries_without_url_are_skipped() {
        let yaml = "monitor:\n  - enabled: true\n  - url: example.com\n";
        let targets = parse_targets(yaml, "test.yml").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://example.com");
    }

    #[test]
    fn test_no_valid_entries_is_an_error() {
        assert!(matches!(
            parse_targets("monitor: []\n", "test.yml"),
            Err(ConfigError::Empty { .. })
        ));
        assert!(matches!(
            parse_targets("monitor:\n  - enabled: true\n", "test.yml"),
            Err(ConfigError::Empty { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(matches!(
            parse_targets("monitor: [", "test.yml"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("Example.COM"), Some("https://example.com".into()));
        assert_eq!(normalize_url("example.com/"), Some("https://example.com".into()));
        assert_eq!(
            normalize_url("http://Example.com/Path/"),
            Some("http://example.com/Path".into())
        );
        assert_eq!(
            normalize_url("https://example.com:8443/health?x=1"),
            Some("https://example.com:8443/health?x=1".into())
        );
        assert_eq!(normalize_url(""), None);
        assert_eq!(normalize_url("   "), None);
        assert_eq!(normalize_url("ftp://example.com"), None);
    }

    #[test]
    fn test_agent_config_parse() {
        let cfg: AgentConfig =
            serde_yaml::from_str("master_host: https://alerts.internal:8000\nauth:\n  token: abc123\n").unwrap();
        assert_eq!(cfg.master_host, "https://alerts.internal:8000");
        assert_eq!(cfg.auth.token, "abc123");
    }

    #[test]
    fn test_update_monitor_config_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("etc").join("config.yml");

        let body = br#"{"configs": [{"url": "example.com", "interval": "30s"}]}"#;
        update_monitor_config(&path, body).unwrap();

        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://example.com");
        assert_eq!(targets[0].interval, Duration::from_secs(30));
    }

    #[test]
    fn test_update_monitor_config_requires_configs_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.yml");

        assert!(matches!(
            update_monitor_config(&path, br#"{"monitor": []}"#),
            Err(ConfigError::MissingConfigsKey)
        ));
        assert!(matches!(
            update_monitor_config(&path, b"not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
