//! Incident lifecycle: detection, deduplication, resolution, notification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::alert::AlertClient;
use crate::db::{Incident, Store, Target};
use crate::probe::ProbeResult;
use crate::util::short_id;

pub const DESC_CERT_ALMOST_EXPIRED: &str = "Certificate almost expired";
pub const DESC_CERT_EXPIRED: &str = "Certificate expired";

/// The failure track an incident belongs to. At most one open incident may
/// exist per (target, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentKind {
    UnexpectedStatus,
    Timeout,
    CertificateExpired,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::UnexpectedStatus => "unexpected_status_code",
            IncidentKind::Timeout => "timeout",
            IncidentKind::CertificateExpired => "certificate_expired",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unexpected_status_code" => Ok(IncidentKind::UnexpectedStatus),
            "timeout" => Ok(IncidentKind::Timeout),
            "certificate_expired" => Ok(IncidentKind::CertificateExpired),
            _ => Err(()),
        }
    }
}

impl Serialize for IncidentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Severity levels understood by the alert sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Remote incident states accepted by the alert sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    FalsePositive,
    OnInvestigation,
    Resolved,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::FalsePositive => "False-Positive",
            RemoteStatus::OnInvestigation => "On Investigation",
            RemoteStatus::Resolved => "Resolved",
        }
    }
}

/// Creates, deduplicates, upgrades and resolves incidents for a target, and
/// publishes every lifecycle event to the alert sink. All sink failures are
/// soft: the monitoring loop keeps running and the remote id stays unset.
pub struct IncidentManager {
    store: Arc<Store>,
    alert: Arc<AlertClient>,
}

impl IncidentManager {
    pub fn new(store: Arc<Store>, alert: Arc<AlertClient>) -> Self {
        Self { store, alert }
    }

    /// Availability track: record a DOWN probe. Returns whether a new
    /// incident was created, and the track it belongs to.
    pub async fn on_down(&self, target: &mut Target, result: &ProbeResult) -> (bool, IncidentKind) {
        let kind = if result.is_timeout() {
            IncidentKind::Timeout
        } else {
            IncidentKind::UnexpectedStatus
        };

        match self.store.last_open_incident(&target.url, kind) {
            Ok(Some(_)) => return (false, kind), // already recorded
            Ok(None) => {}
            Err(e) => {
                tracing::error!("{} - failed to look up open incidents: {}", target.url, e);
                return (false, kind);
            }
        }

        let description = if kind == IncidentKind::Timeout {
            format!("Request timed out: {}", target.url)
        } else if result.status_code != 0 {
            format!(
                "Received non-successful status code: {} {}",
                result.status_code,
                reason_phrase(result.status_code)
            )
        } else {
            format!("An unexpected error occurred at {}", target.url)
        };

        let mut incident = Incident {
            id: short_id(),
            target_id: target.id.clone(),
            remote_id: None,
            kind,
            description,
            created_at: Utc::now(),
            solved_at: None,
        };

        let mut attributes = Map::new();
        attributes.insert("status_code".into(), json!(result.status_code));
        attributes.insert("response_time".into(), json!(result.response_time.as_secs_f64()));
        attributes.insert(
            "error_message".into(),
            json!(result.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default()),
        );

        self.notify(&mut incident, &target.url, Severity::High, attributes).await;

        target.last_down = Some(Utc::now());
        if let Err(e) = self.store.create_incident(&incident) {
            tracing::error!("{} - failed to save incident: {}", target.url, e);
            return (false, kind);
        }

        tracing::error!("{} - new incident detected - type: {}", target.url, kind);
        (true, kind)
    }

    /// Mark the open incident of the given kind, if any, as resolved.
    /// Idempotent: a second call for the same kind is a no-op.
    pub async fn resolve_open(&self, target: &mut Target, kind: IncidentKind) -> bool {
        let open = match self.store.last_open_incident(&target.url, kind) {
            Ok(open) => open,
            Err(e) => {
                tracing::error!("{} - failed to look up open incidents: {}", target.url, e);
                return false;
            }
        };
        let Some(mut incident) = open else {
            return false;
        };

        let now = Utc::now();
        if let Err(e) = self.store.resolve_incident(&incident.id, now) {
            tracing::error!("{} - failed to resolve incident {}: {}", target.url, incident.id, e);
            return false;
        }
        incident.solved_at = Some(now);
        target.last_up = Some(now);

        tracing::info!(
            "{} - incident solved - type: {} - downtime: {}s",
            target.url,
            kind,
            (now - incident.created_at).num_seconds()
        );

        if let Err(e) = self
            .alert
            .update_incident_status(&incident, RemoteStatus::Resolved)
            .await
        {
            tracing::warn!("{} - alert sink status update failed: {}", target.url, e);
        }

        true
    }

    /// Certificate track. Two stages: "almost expired" inside the warning
    /// horizon, upgraded to "expired" once NotAfter has passed. A healthy
    /// margin resolves whatever is open. Returns whether anything changed.
    pub async fn on_certificate(&self, target: &mut Target, result: &ProbeResult) -> bool {
        let Some(not_after) = result.cert_not_after else {
            return false;
        };

        let open = match self
            .store
            .last_open_incident(&target.url, IncidentKind::CertificateExpired)
        {
            Ok(open) => open,
            Err(e) => {
                tracing::error!("{} - failed to look up open incidents: {}", target.url, e);
                return false;
            }
        };

        let remaining = not_after - Utc::now();
        let mut attributes = Map::new();
        attributes.insert("expired_date".into(), json!(not_after.to_rfc3339()));

        if remaining <= chrono::Duration::zero() {
            if let Some(existing) = open {
                if existing.description != DESC_CERT_ALMOST_EXPIRED {
                    return false; // already recorded as expired
                }

                tracing::error!("{} - certificate expired - [{}]", target.url, not_after);
                if let Err(e) = self
                    .store
                    .upgrade_incident_description(&existing.id, DESC_CERT_EXPIRED)
                {
                    tracing::error!("{} - failed to update incident {}: {}", target.url, existing.id, e);
                    return false;
                }

                let mut upgraded = existing;
                upgraded.description = DESC_CERT_EXPIRED.to_string();
                self.notify(&mut upgraded, &target.url, Severity::High, attributes).await;
                if let Some(remote_id) = upgraded.remote_id {
                    if let Err(e) = self.store.set_incident_remote_id(&upgraded.id, remote_id) {
                        tracing::error!("{} - failed to save remote incident id: {}", target.url, e);
                    }
                }
                return true;
            }

            tracing::error!("{} - certificate expired - [{}]", target.url, not_after);
            return self
                .create_certificate_incident(target, DESC_CERT_EXPIRED, Severity::High, attributes)
                .await;
        }

        let threshold = chrono::Duration::from_std(target.certificate_expired_before)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));

        if remaining <= threshold {
            if open.is_some() {
                return false; // already warned
            }

            tracing::warn!("{} - certificate expiring soon - [{}]", target.url, not_after);
            return self
                .create_certificate_incident(target, DESC_CERT_ALMOST_EXPIRED, Severity::Info, attributes)
                .await;
        }

        if let Some(existing) = open {
            if let Err(e) = self.store.resolve_incident(&existing.id, Utc::now()) {
                tracing::error!("{} - failed to resolve incident {}: {}", target.url, existing.id, e);
                return false;
            }
            tracing::info!("{} - certificate renewed", target.url);
            return true;
        }

        false
    }

    async fn create_certificate_incident(
        &self,
        target: &Target,
        description: &str,
        severity: Severity,
        attributes: Map<String, Value>,
    ) -> bool {
        let mut incident = Incident {
            id: short_id(),
            target_id: target.id.clone(),
            remote_id: None,
            kind: IncidentKind::CertificateExpired,
            description: description.to_string(),
            created_at: Utc::now(),
            solved_at: None,
        };

        self.notify(&mut incident, &target.url, severity, attributes).await;

        if let Err(e) = self.store.create_incident(&incident) {
            tracing::error!("{} - failed to save incident: {}", target.url, e);
            return false;
        }
        true
    }

    async fn notify(
        &self,
        incident: &mut Incident,
        url: &str,
        severity: Severity,
        attributes: Map<String, Value>,
    ) {
        match self.alert.notify_incident(incident, url, severity, attributes).await {
            Ok(remote_id) => incident.remote_id = Some(remote_id),
            Err(e) => tracing::warn!("{} - alert sink notification failed: {}", url, e),
        }
    }
}

fn reason_phrase(code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
