//! Client for the remote alert sink.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::AgentConfig;
use crate::db::Incident;
use crate::incident::{RemoteStatus, Severity};

/// Module name reported with every notification.
const MODULE: &str = "sitewatch";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Echo services tried in order when discovering the host's public IP.
const IP_ECHO_ENDPOINTS: &[&str] = &["https://api.ipify.org", "https://ifconfig.me/ip"];

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert sink token is not configured")]
    MissingToken,
    #[error("incident has no remote id")]
    MissingRemoteId,
    #[error("could not determine public IP address")]
    NoPublicIp,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

#[derive(Debug, Default, Deserialize)]
struct SinkResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: SinkData,
}

#[derive(Debug, Default, Deserialize)]
struct SinkData {
    #[serde(default)]
    incident_id: u64,
}

#[derive(Serialize)]
struct CreatePayload<'a> {
    server_ip: &'a str,
    module: &'a str,
    severity: &'a str,
    message: &'a str,
    event: &'a str,
    tags: [&'a str; 3],
    #[serde(skip_serializing_if = "Map::is_empty")]
    attributes: Map<String, Value>,
}

/// Authenticated client for the alert sink. Both operations are best-effort
/// from the monitoring loop's point of view: callers log failures and move on.
pub struct AlertClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    public_ip: OnceCell<String>,
}

impl AlertClient {
    pub fn new(cfg: &AgentConfig) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: cfg.master_host.trim_end_matches('/').to_string(),
            token: cfg.auth.token.clone(),
            public_ip: OnceCell::new(),
        })
    }

    /// Publish a newly created (or upgraded) incident. Returns the id the
    /// sink assigned so it can be attached to the local record.
    pub async fn notify_incident(
        &self,
        incident: &Incident,
        url: &str,
        severity: Severity,
        extra_attributes: Map<String, Value>,
    ) -> Result<u64, AlertError> {
        if self.token.is_empty() {
            return Err(AlertError::MissingToken);
        }

        let server_ip = self.public_ip().await?;

        let mut attributes = Map::new();
        attributes.insert("url".into(), json!(url));
        attributes.extend(extra_attributes);

        let payload = CreatePayload {
            server_ip: &server_ip,
            module: MODULE,
            severity: severity.as_str(),
            message: &incident.description,
            event: "website_down",
            tags: ["uptime", "monitoring", incident.kind.as_str()],
            attributes,
        };

        let resp = self
            .client
            .post(format!("{}/api/v1/incidents/add", self.base_url))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::CREATED {
            return Err(AlertError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SinkResponse = serde_json::from_str(&body)?;
        tracing::info!(
            "{} - incident published - reason: {} - remote id: {}",
            url,
            incident.kind,
            parsed.data.incident_id
        );
        Ok(parsed.data.incident_id)
    }

    /// Move a previously published incident to a new remote state.
    pub async fn update_incident_status(
        &self,
        incident: &Incident,
        status: RemoteStatus,
    ) -> Result<(), AlertError> {
        if self.token.is_empty() {
            return Err(AlertError::MissingToken);
        }
        let remote_id = incident.remote_id.ok_or(AlertError::MissingRemoteId)?;

        let resp = self
            .client
            .post(format!(
                "{}/api/v1/incidents/{}/update-status",
                self.base_url, remote_id
            ))
            .bearer_auth(&self.token)
            .json(&json!({ "status": status.as_str() }))
            .send()
            .await?;

        let http_status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if http_status != reqwest::StatusCode::OK {
            return Err(AlertError::UnexpectedStatus {
                status: http_status.as_u16(),
                body,
            });
        }

        let parsed: SinkResponse = serde_json::from_str(&body).unwrap_or_default();
        tracing::info!(
            "incident {} moved to '{}' - message: {}",
            remote_id,
            status.as_str(),
            parsed.message
        );
        Ok(())
    }

    /// The host's public IP, resolved once per client and cached.
    async fn public_ip(&self) -> Result<String, AlertError> {
        self.public_ip
            .get_or_try_init(|| async {
                for endpoint in IP_ECHO_ENDPOINTS {
                    match self.client.get(*endpoint).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            if let Ok(text) = resp.text().await {
                                let ip = text.trim().to_string();
                                if !ip.is_empty() {
                                    return Ok(ip);
                                }
                            }
                        }
                        Ok(resp) => {
                            tracing::debug!("ip echo {} answered {}", endpoint, resp.status());
                        }
                        Err(e) => {
                            tracing::debug!("ip echo {} failed: {}", endpoint, e);
                        }
                    }
                }
                Err(AlertError::NoPublicIp)
            })
            .await
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn with_server_ip(mut self, ip: &str) -> Self {
        self.public_ip = OnceCell::new_with(Some(ip.to_string()));
        self
    }
}
