//! Database model types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::incident::IncidentKind;

/// A monitored endpoint: its configuration plus the last observed state.
///
/// Configuration columns are owned by the YAML config (reconciled at startup
/// by URL); observed state is mutated only by the target's own monitor loop.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    #[serde(skip)]
    pub id: String,
    pub url: String,
    #[serde(skip)]
    pub enabled: bool,
    #[serde(skip)]
    pub interval: Duration,
    #[serde(skip)]
    pub response_time_threshold: Duration,
    #[serde(skip)]
    pub certificate_monitoring: bool,
    #[serde(skip)]
    pub certificate_expired_before: Duration,
    #[serde(skip)]
    pub follow_redirects: bool,
    #[serde(skip)]
    pub max_retries: u32,
    #[serde(skip)]
    pub retry_interval: Duration,
    #[serde(skip)]
    pub dns_timeout: Duration,
    #[serde(skip)]
    pub dial_timeout: Duration,
    #[serde(skip)]
    pub tls_handshake_timeout: Duration,
    #[serde(skip)]
    pub response_header_timeout: Duration,

    /// Unknown until the first check completes.
    pub is_up: Option<bool>,
    pub status_code: Option<u16>,
    #[serde(rename = "response_time")]
    pub response_time_ms: Option<i64>,
    pub certificate_expired_date: Option<DateTime<Utc>>,
    pub last_up: Option<DateTime<Utc>>,
    pub last_down: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub retries: u32,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "last_check")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Target {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            url: String::new(),
            enabled: true,
            interval: Duration::from_secs(300),
            response_time_threshold: Duration::from_secs(30),
            certificate_monitoring: false,
            certificate_expired_before: Duration::from_secs(31 * 86_400),
            follow_redirects: true,
            max_retries: 3,
            retry_interval: Duration::from_secs(60),
            dns_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(10),
            tls_handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(20),
            is_up: None,
            status_code: None,
            response_time_ms: None,
            certificate_expired_date: None,
            last_up: None,
            last_down: None,
            retries: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One probe outcome. Append-only history row.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSample {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub target_id: String,
    pub is_up: bool,
    #[serde(skip)]
    pub status_code: u16,
    #[serde(rename = "response_time")]
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A continuing anomaly on a target. Open while `solved_at` is unset.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: String,
    pub target_id: String,
    /// Identifier assigned by the remote alert sink, when it accepted the
    /// incident.
    #[serde(skip)]
    pub remote_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.solved_at.is_none()
    }
}

/// A target joined with its most recent check samples, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    #[serde(flatten)]
    pub target: Target,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub histories: Vec<CheckSample>,
}
