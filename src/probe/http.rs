//! The timed HTTP GET behind every check.

use std::error::Error as _;
use std::time::{Duration, Instant};

use super::{FailureKind, ProbeFailure, ProbeResult, USER_AGENT};
use crate::db::Target;

pub(super) async fn execute(target: &Target) -> ProbeResult {
    let mut result = ProbeResult {
        raw_up: false,
        status_code: 0,
        response_time: Duration::ZERO,
        cert_not_after: None,
        error: None,
    };

    // Literal IP hosts have no hostname-valid certificate, so verification
    // can only fail there; otherwise it follows the monitoring flag.
    let skip_verify = !target.certificate_monitoring || host_is_ip(&target.url);

    let redirect = if target.follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    // reqwest's connect phase spans DNS resolution, TCP connect and the TLS
    // handshake, so the granular budgets sum into its deadline.
    let client = match reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(target.response_time_threshold)
        .connect_timeout(target.dns_timeout + target.dial_timeout + target.tls_handshake_timeout)
        .read_timeout(target.response_header_timeout)
        .redirect(redirect)
        .danger_accept_invalid_certs(skip_verify)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            result.error = Some(ProbeFailure {
                kind: FailureKind::Other,
                message: format!("Failed to build HTTP client for {}: {}", target.url, e),
            });
            return result;
        }
    };

    let start = Instant::now();

    match client.get(&target.url).send().await {
        Ok(resp) => {
            result.response_time = start.elapsed();
            result.status_code = resp.status().as_u16();
            result.raw_up = resp.status().is_success();
        }
        Err(err) => {
            result.response_time = start.elapsed();
            let (kind, message) = classify_error(&err, &target.url);
            if kind == FailureKind::Timeout {
                // The request was cut off at the deadline; record the
                // threshold rather than however long the abort took.
                result.response_time = target.response_time_threshold;
            }
            result.error = Some(ProbeFailure { kind, message });
        }
    }

    result
}

fn classify_error(err: &reqwest::Error, url: &str) -> (FailureKind, String) {
    if err.is_timeout() {
        return (
            FailureKind::Timeout,
            format!("Request timed out while fetching {url}"),
        );
    }

    if source_is_unexpected_eof(err) {
        return (
            FailureKind::Eof,
            format!(
                "Connection closed prematurely (EOF) while fetching {url}. \
                 This might indicate a server issue or an incomplete response."
            ),
        );
    }

    if err.is_connect() {
        return (
            FailureKind::Connection,
            format!(
                "Network operation error for {url}: {}. Check connectivity or target server status.",
                root_cause(err)
            ),
        );
    }

    (FailureKind::Other, format!("Failed to fetch {url}: {err}"))
}

/// Walk the source chain looking for a premature connection close.
fn source_is_unexpected_eof(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        let text = cause.to_string();
        if text.contains("connection closed before message completed") || text.contains("IncompleteMessage") {
            return true;
        }
        source = cause.source();
    }
    false
}

fn root_cause(err: &reqwest::Error) -> String {
    let mut cause: &dyn std::error::Error = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}

fn host_is_ip(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(u) => matches!(u.host(), Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_server(status: StatusCode, delay: Duration) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/",
            get(move || async move {
                tokio::time::sleep(delay).await;
                status
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn target_for(url: String) -> Target {
        Target {
            url,
            response_time_threshold: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_probe_success() {
        let url = spawn_server(StatusCode::OK, Duration::ZERO).await;
        let result = execute(&target_for(url)).await;

        assert!(result.raw_up);
        assert_eq!(result.status_code, 200);
        assert!(result.error.is_none());
        assert!(result.response_time > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_probe_non_success_status() {
        let url = spawn_server(StatusCode::INTERNAL_SERVER_ERROR, Duration::ZERO).await;
        let result = execute(&target_for(url)).await;

        assert!(!result.raw_up);
        assert_eq!(result.status_code, 500);
        // A delivered response is not a transport error.
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_timeout_clamps_response_time() {
        let url = spawn_server(StatusCode::OK, Duration::from_millis(500)).await;
        let mut target = target_for(url);
        target.response_time_threshold = Duration::from_millis(100);

        let result = execute(&target).await;

        assert!(!result.raw_up);
        assert_eq!(result.status_code, 0);
        assert!(result.is_timeout());
        assert_eq!(result.response_time, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        // Nothing listens on this port of the discard range.
        let result = execute(&target_for("http://127.0.0.1:9".to_string())).await;

        assert!(!result.raw_up);
        assert_eq!(result.status_code, 0);
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, FailureKind::Connection);
        assert!(failure.message.contains("Network operation error"));
    }

    #[test]
    fn test_host_is_ip() {
        assert!(host_is_ip("https://127.0.0.1/health"));
        assert!(host_is_ip("https://[::1]:8443/"));
        assert!(!host_is_ip("https://example.com"));
        assert!(!host_is_ip("not a url"));
    }
}
