//! Configuration module for bdix-probe.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::{ProbeConfig, ReachabilityPolicy, DEFAULT_TIMEOUT};
use crate::scheduler::{BatchOptions, HistoryPolicy, DEFAULT_CONCURRENCY};

/// Which transport probes use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Http,
    Tcp,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "bdix-probe.db")
    pub db_path: String,
    /// Per-probe deadline (default: 2500ms)
    pub timeout: Duration,
    /// Probes in flight per batch (default: 10)
    pub concurrency_limit: usize,
    pub transport: TransportKind,
    pub policy: ReachabilityPolicy,
    /// JSON catalog replacing the built-in server list
    pub catalog_path: Option<String>,
    /// Re-run the catalog this often; zero disables monitoring
    pub monitor_interval: Duration,
    pub history: HistoryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "bdix-probe.db".to_string(),
            timeout: DEFAULT_TIMEOUT,
            concurrency_limit: DEFAULT_CONCURRENCY,
            transport: TransportKind::default(),
            policy: ReachabilityPolicy::default(),
            catalog_path: None,
            monitor_interval: Duration::ZERO,
            history: HistoryPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BDIX_HTTP_PORT`: HTTP port (default: 8080)
    /// - `BDIX_DB_PATH`: Database file path (default: "bdix-probe.db")
    /// - `BDIX_TIMEOUT_MS`: Per-probe timeout (default: 2500)
    /// - `BDIX_CONCURRENCY`: Probes in flight per batch, at least 1 (default: 10)
    /// - `BDIX_TRANSPORT`: `http` or `tcp` (default: http)
    /// - `BDIX_POLICY`: `opaque` or `strict` (default: opaque)
    /// - `BDIX_CATALOG`: Path to a JSON server catalog
    /// - `BDIX_MONITOR_INTERVAL_SECS`: Monitoring interval, 0 to disable (default: 0)
    /// - `BDIX_HISTORY_RETENTION_SECS`: Keep runs this long (default: 604800)
    /// - `BDIX_HISTORY_MAX_RUNS`: Keep at most this many runs (default: 100)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "BDIX_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("BDIX_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "BDIX_TIMEOUT_MS") {
            if ms > 0 {
                cfg.timeout = Duration::from_millis(ms);
            } else {
                tracing::warn!("Ignoring BDIX_TIMEOUT_MS=0");
            }
        }

        // usize rejects negative limits at parse time
        if let Some(limit) = parse_var::<usize, _>(&lookup, "BDIX_CONCURRENCY") {
            if limit > 0 {
                cfg.concurrency_limit = limit;
            } else {
                tracing::warn!("Ignoring BDIX_CONCURRENCY=0");
            }
        }

        if let Some(transport) = parse_var(&lookup, "BDIX_TRANSPORT") {
            cfg.transport = transport;
        }

        if let Some(policy) = parse_var(&lookup, "BDIX_POLICY") {
            cfg.policy = policy;
        }

        cfg.catalog_path = lookup("BDIX_CATALOG").filter(|p| !p.trim().is_empty());

        if let Some(secs) = parse_var(&lookup, "BDIX_MONITOR_INTERVAL_SECS") {
            cfg.monitor_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var(&lookup, "BDIX_HISTORY_RETENTION_SECS") {
            cfg.history.retention = Duration::from_secs(secs);
        }

        if let Some(max_runs) = parse_var(&lookup, "BDIX_HISTORY_MAX_RUNS") {
            cfg.history.max_runs = max_runs;
        }

        cfg
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency_limit: self.concurrency_limit,
            probe: ProbeConfig {
                timeout: self.timeout,
                policy: self.policy,
            },
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "bdix-probe.db");
        assert_eq!(cfg.timeout, Duration::from_millis(2500));
        assert_eq!(cfg.concurrency_limit, 10);
        assert_eq!(cfg.policy, ReachabilityPolicy::Opaque);
        assert_eq!(cfg.monitor_interval, Duration::ZERO);
        assert_eq!(load_from(&[]), cfg);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = load_from(&[
            ("BDIX_HTTP_PORT", "3000"),
            ("BDIX_TIMEOUT_MS", "1500"),
            ("BDIX_CONCURRENCY", "4"),
            ("BDIX_TRANSPORT", "tcp"),
            ("BDIX_POLICY", "strict"),
            ("BDIX_CATALOG", "servers.json"),
            ("BDIX_MONITOR_INTERVAL_SECS", "30"),
            ("BDIX_HISTORY_MAX_RUNS", "10"),
        ]);

        assert_eq!(cfg.http_port, 3000);
        assert_eq!(cfg.transport, TransportKind::Tcp);
        assert_eq!(cfg.catalog_path.as_deref(), Some("servers.json"));
        assert_eq!(cfg.monitor_interval, Duration::from_secs(30));
        assert_eq!(cfg.history.max_runs, 10);

        let options = cfg.batch_options();
        assert_eq!(options.concurrency_limit, 4);
        assert_eq!(options.probe.timeout, Duration::from_millis(1500));
        assert_eq!(options.probe.policy, ReachabilityPolicy::Strict);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = load_from(&[
            ("BDIX_HTTP_PORT", "not-a-port"),
            ("BDIX_CONCURRENCY", "-3"),
            ("BDIX_TIMEOUT_MS", "0"),
            ("BDIX_POLICY", "lenient"),
            ("BDIX_CATALOG", " "),
        ]);

        assert_eq!(cfg, ServerConfig::default());
    }
}
