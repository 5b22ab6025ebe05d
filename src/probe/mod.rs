//! Probe module for reachability checks.
//!
//! A probe races one transport attempt against its deadline and the batch's
//! cancellation token, then classifies what happened with a
//! [`ReachabilityPolicy`]. Transports are pluggable: HTTP and bare TCP.

mod http;
mod tcp;

pub use http::*;
pub use tcp::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default per-probe deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("invalid url {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// What a transport observed when its attempt finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Completion {
    /// HTTP status, when the transport speaks HTTP and got a response.
    pub status: Option<u16>,
}

/// A single connection attempt against a normalized URL.
///
/// Implementations must not apply their own deadline; [`probe`] owns it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Completion, ProbeError>;
}

/// One URL of one logical server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub label: String,
    /// Position of `url` among the server's URLs. Together with `label` it
    /// identifies the target; labels alone repeat.
    #[serde(default)]
    pub index: usize,
    pub url: String,
}

impl Target {
    #[cfg(test)]
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_index(label, 0, url)
    }

    pub fn with_index(label: impl Into<String>, index: usize, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            index,
            url: url.into(),
        }
    }
}

/// Result classification of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Reachable,
    Unreachable,
    TimedOut,
}

impl ProbeState {
    pub fn is_online(self) -> bool {
        self == ProbeState::Reachable
    }

    /// The two-valued status shown to users.
    pub fn status_label(self) -> &'static str {
        if self.is_online() {
            "Online"
        } else {
            "Offline"
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeState::Reachable => "reachable",
            ProbeState::Unreachable => "unreachable",
            ProbeState::TimedOut => "timed_out",
        }
    }
}

impl FromStr for ProbeState {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reachable" => Ok(ProbeState::Reachable),
            "unreachable" => Ok(ProbeState::Unreachable),
            "timed_out" => Ok(ProbeState::TimedOut),
            other => Err(ProbeError::Config(format!("unknown probe state: {}", other))),
        }
    }
}

/// How a finished transport attempt maps to a [`ProbeState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityPolicy {
    /// Any attempt that finishes before the deadline, successfully or with an
    /// error, counts as `Reachable`. Opaque cross-origin failures still mean a
    /// handshake happened; only silence until the deadline means the host is
    /// not reachable on this network path. Cannot tell a CORS/TLS block apart
    /// from an immediate RST.
    #[default]
    Opaque,
    /// Transport errors count as `Unreachable`. Only meaningful where errors
    /// are observable, e.g. server-side probing.
    Strict,
}

impl ReachabilityPolicy {
    pub fn classify(self, result: &Result<Completion, ProbeError>) -> ProbeState {
        match (self, result) {
            (_, Ok(_)) => ProbeState::Reachable,
            (ReachabilityPolicy::Opaque, Err(_)) => ProbeState::Reachable,
            (ReachabilityPolicy::Strict, Err(_)) => ProbeState::Unreachable,
        }
    }
}

impl FromStr for ReachabilityPolicy {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opaque" => Ok(ReachabilityPolicy::Opaque),
            "strict" => Ok(ReachabilityPolicy::Strict),
            other => Err(ProbeError::Config(format!("unknown reachability policy: {}", other))),
        }
    }
}

/// Probe configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub policy: ReachabilityPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            policy: ReachabilityPolicy::default(),
        }
    }
}

/// The settled result of probing one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub target: Target,
    pub state: ProbeState,
    pub elapsed_ms: u64,
    pub observed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn settled(target: &Target, state: ProbeState, elapsed: Duration) -> Self {
        Self {
            target: target.clone(),
            state,
            elapsed_ms: elapsed.as_millis() as u64,
            observed_at: Utc::now(),
            status_code: None,
            error: None,
        }
    }
}

/// Normalize a user-supplied address into an absolute http(s) URL.
///
/// Addresses without a scheme get `http://`; BDIX hosts are usually plain
/// HTTP on the local exchange. Hosts must be an IP literal, `localhost` or a
/// dotted domain name.
pub fn normalize_url(raw: &str) -> Result<Url, ProbeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::InvalidUrl(raw.to_string(), "empty address".to_string()));
    }

    let candidate = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ProbeError::InvalidUrl(raw.to_string(), e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ProbeError::InvalidUrl(
            raw.to_string(),
            format!("unsupported scheme {}", url.scheme()),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::InvalidUrl(raw.to_string(), "missing host".to_string()))?;

    if !is_probeable_host(host) {
        return Err(ProbeError::InvalidUrl(
            raw.to_string(),
            format!("{} is not an IP address or domain name", host),
        ));
    }

    Ok(url)
}

/// Whether `addr` starts with `scheme://`. A `://` later in the path or
/// query does not count.
fn has_scheme(addr: &str) -> bool {
    let Some(pos) = addr.find("://") else {
        return false;
    };

    let scheme = &addr[..pos];
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_probeable_host(host: &str) -> bool {
    if host.starts_with('[') || host.parse::<std::net::Ipv4Addr>().is_ok() {
        return true;
    }
    if host == "localhost" {
        return true;
    }

    // A fully qualified name may end with the root label
    let host = host.strip_suffix('.').unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Probe one target.
///
/// Never fails: malformed addresses settle as `Unreachable` without touching
/// the network, a cancelled token or the deadline settle as `TimedOut`, and
/// everything else is up to `config.policy`.
pub async fn probe(
    target: &Target,
    transport: &dyn Transport,
    config: &ProbeConfig,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    let url = match normalize_url(&target.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!("Skipping {} ({}): {}", target.label, target.url, e);
            let mut outcome = ProbeOutcome::settled(target, ProbeState::Unreachable, Duration::ZERO);
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };

    if cancel.is_cancelled() {
        return ProbeOutcome::settled(target, ProbeState::TimedOut, Duration::ZERO);
    }

    let start = Instant::now();

    let (state, completion) = tokio::select! {
        biased;
        _ = cancel.cancelled() => (ProbeState::TimedOut, None),
        _ = tokio::time::sleep(config.timeout) => (ProbeState::TimedOut, None),
        result = transport.connect(&url) => (config.policy.classify(&result), Some(result)),
    };

    let mut outcome = ProbeOutcome::settled(target, state, start.elapsed());
    match completion {
        Some(Ok(done)) => outcome.status_code = done.status,
        Some(Err(e)) => outcome.error = Some(e.to_string()),
        None => {}
    }

    tracing::debug!(
        "Probe {} [{}] {} -> {:?} in {}ms",
        target.label,
        target.index,
        url,
        outcome.state,
        outcome.elapsed_ms
    );

    outcome
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transports for exercising probes and batches without a network.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    pub enum Behavior {
        Succeed,
        Fail,
        Hang,
        SucceedAfter(Duration),
        FailAfter(Duration),
    }

    /// Transport whose behavior is chosen per host, with call accounting.
    pub struct ScriptedTransport {
        behaviors: HashMap<String, Behavior>,
        fallback: Behavior,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(fallback: Behavior) -> Self {
            Self {
                behaviors: HashMap::new(),
                fallback,
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with(mut self, host: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(host.to_string(), behavior);
            self
        }

        pub fn high_water(&self) -> usize {
            self.high_water.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self, url: &Url) -> Result<Completion, ProbeError> {
            let host = url.host_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(host.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            match self.behaviors.get(&host).copied().unwrap_or(self.fallback) {
                Behavior::Succeed => Ok(Completion { status: Some(200) }),
                Behavior::Fail => Err(ProbeError::Network("connection refused".to_string())),
                Behavior::Hang => std::future::pending().await,
                Behavior::SucceedAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Completion { status: Some(200) })
                }
                Behavior::FailAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(ProbeError::Network("opaque failure".to_string()))
                }
            }
        }
    }
}
