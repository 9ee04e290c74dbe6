//! TLS peek: capture the peer certificate's expiry for a target.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::db::Target;

/// Fetch the leaf certificate's NotAfter for an https target, or `None`
/// when the target speaks plain HTTP or no handshake could be completed.
pub(super) async fn peer_cert_not_after(target: &Target) -> Option<DateTime<Utc>> {
    let parsed = url::Url::parse(&target.url).ok()?;
    if parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default().unwrap_or(443);

    match fetch_not_after(&host, port, target).await {
        Ok(not_after) => Some(not_after),
        Err(e) => {
            tracing::debug!("{} - certificate inspection failed: {}", target.url, e);
            None
        }
    }
}

async fn fetch_not_after(host: &str, port: u16, target: &Target) -> Result<DateTime<Utc>, String> {
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| format!("invalid server name: {e}"))?;

    let stream = tokio::time::timeout(target.dial_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| "dial timed out".to_string())?
        .map_err(|e| format!("dial failed: {e}"))?;

    // Verification is disabled on purpose: an expired certificate must still
    // be observable, and the GET path already enforces verification.
    let config = ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("tls config: {e}"))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let tls = tokio::time::timeout(
        target.tls_handshake_timeout,
        connector.connect(server_name, stream),
    )
    .await
    .map_err(|_| "handshake timed out".to_string())?
    .map_err(|e| format!("handshake failed: {e}"))?;

    let (_, session) = tls.get_ref();
    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| "no peer certificate presented".to_string())?;

    not_after_from_der(leaf.as_ref())
}

fn not_after_from_der(der: &[u8]) -> Result<DateTime<Utc>, String> {
    let cert = Certificate::from_der(der).map_err(|e| format!("certificate parse: {e}"))?;
    let not_after = cert.tbs_certificate.validity.not_after.to_unix_duration();
    DateTime::<Utc>::from_timestamp(not_after.as_secs() as i64, 0)
        .ok_or_else(|| "certificate expiry out of range".to_string())
}

/// Accepts any server certificate. Used only for the expiry peek.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_not_after_from_der() {
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2031, 1, 1);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let not_after = not_after_from_der(cert.der()).unwrap();
        assert_eq!(not_after.year(), 2031);
    }

    #[test]
    fn test_not_after_rejects_garbage() {
        assert!(not_after_from_der(&[0x00, 0x01, 0x02]).is_err());
    }

    #[tokio::test]
    async fn test_peek_skips_plain_http() {
        let target = Target {
            url: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(peer_cert_not_after(&target).await.is_none());
    }
}
