//! Probe executor: one timed HTTP(S) check per invocation.

mod http;
mod tls;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::Target;

/// User-Agent sent with every probe request.
pub const USER_AGENT: &str = concat!("sitewatch/", env!("CARGO_PKG_VERSION"));

/// Coarse classification of a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A deadline elapsed in any phase of the request.
    Timeout,
    /// OS-level connection failure (refused, unreachable, reset).
    Connection,
    /// The connection closed before a full response arrived.
    Eof,
    Other,
}

#[derive(Debug, Clone)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of a single probe. The executor never fails; every failure mode
/// is encoded here.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// True when the final HTTP status was 2xx.
    pub raw_up: bool,
    /// 0 when no response was received.
    pub status_code: u16,
    pub response_time: Duration,
    /// Expiry of the leaf peer certificate, when one was observed.
    pub cert_not_after: Option<DateTime<Utc>>,
    pub error: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == FailureKind::Timeout)
    }
}

/// Run one check against the target: a timed GET, plus a certificate
/// inspection when certificate monitoring is enabled.
pub async fn check(target: &Target) -> ProbeResult {
    let mut result = http::execute(target).await;

    if target.certificate_monitoring {
        result.cert_not_after = tls::peer_cert_not_after(target).await;
    }

    result
}
