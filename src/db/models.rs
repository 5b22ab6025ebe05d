//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probe::ProbeOutcome;

/// A stored batch run with its tallies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub concurrency_limit: i64,
    pub cancelled: bool,
    /// Number of targets the run was launched with.
    pub total: i64,
    pub online: i64,
    pub offline: i64,
}

/// A run together with its outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: RunRecord,
    pub outcomes: Vec<ProbeOutcome>,
}

/// Summary over recent history for the analytics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    pub online_servers: i64,
    pub offline_servers: i64,
    pub total_servers: i64,
    /// Mean response time of online outcomes in the latest run.
    pub average_response_ms: Option<f64>,
    /// Change in online count between the oldest and newest of the recent runs.
    pub uptime_trend: i64,
    pub total_tests: i64,
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl Analytics {
    /// `recent` is newest first; `latest` holds the outcomes of `recent[0]`.
    pub fn from_history(recent: &[RunRecord], latest: &[ProbeOutcome], total_tests: i64) -> Self {
        let newest = recent.first();

        let online_times: Vec<u64> = latest
            .iter()
            .filter(|o| o.state.is_online())
            .map(|o| o.elapsed_ms)
            .collect();
        let average_response_ms = if online_times.is_empty() {
            None
        } else {
            Some(online_times.iter().sum::<u64>() as f64 / online_times.len() as f64)
        };

        let uptime_trend = match (recent.first(), recent.last()) {
            (Some(newest), Some(oldest)) if recent.len() > 1 => newest.online - oldest.online,
            _ => 0,
        };

        Self {
            online_servers: newest.map(|r| r.online).unwrap_or(0),
            offline_servers: newest.map(|r| r.offline).unwrap_or(0),
            total_servers: newest.map(|r| r.online + r.offline).unwrap_or(0),
            average_response_ms,
            uptime_trend,
            total_tests,
            last_tested_at: newest.map(|r| r.completed_at.unwrap_or(r.started_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeState, Target};

    fn record(id: &str, online: i64, offline: i64) -> RunRecord {
        RunRecord {
            id: id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            concurrency_limit: 10,
            cancelled: false,
            total: online + offline,
            online,
            offline,
        }
    }

    fn outcome(label: &str, state: ProbeState, elapsed_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            target: Target::new(label, "http://10.0.0.1"),
            state,
            elapsed_ms,
            observed_at: Utc::now(),
            status_code: None,
            error: None,
        }
    }

    #[test]
    fn test_analytics_from_history() {
        let recent = vec![record("c", 7, 3), record("b", 5, 5), record("a", 4, 6)];
        let latest = vec![
            outcome("A", ProbeState::Reachable, 100),
            outcome("B", ProbeState::Reachable, 300),
            outcome("C", ProbeState::TimedOut, 2500),
        ];

        let analytics = Analytics::from_history(&recent, &latest, 12);
        assert_eq!(analytics.online_servers, 7);
        assert_eq!(analytics.offline_servers, 3);
        assert_eq!(analytics.total_servers, 10);
        assert_eq!(analytics.average_response_ms, Some(200.0));
        assert_eq!(analytics.uptime_trend, 3);
        assert_eq!(analytics.total_tests, 12);
    }

    #[test]
    fn test_analytics_empty_history() {
        let analytics = Analytics::from_history(&[], &[], 0);
        assert_eq!(analytics.total_servers, 0);
        assert_eq!(analytics.average_response_ms, None);
        assert_eq!(analytics.uptime_trend, 0);
        assert!(analytics.last_tested_at.is_none());
    }
}
