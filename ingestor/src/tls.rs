//! Transport selection for the broker connection.
//!
//! TLS with a readable CA file verifies the broker against that CA. Without a
//! usable CA file the platform trust roots are used, unless the operator
//! opted into unverified TLS, which is always logged and counted.

use crate::errors::{Error, Result};
use crate::metrics::TLS_DEGRADED_TOTAL;
use rumqttc::{TlsConfiguration, Transport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub ca_cert_path: Option<PathBuf>,
    /// Permits encrypted-but-unverified transport when no CA file is usable.
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    VerifiedWithCa(PathBuf),
    PlatformRoots,
    Unverified,
}

impl TlsSettings {
    /// Decides which transport to use. Only checks for the CA file's presence.
    pub fn mode(&self) -> TransportMode {
        if !self.enabled {
            return TransportMode::Plain;
        }

        match &self.ca_cert_path {
            Some(path) if path.is_file() => return TransportMode::VerifiedWithCa(path.clone()),
            Some(path) => warn!("CA certificate {} not found", path.display()),
            None => {}
        }

        if self.insecure_skip_verify {
            TransportMode::Unverified
        } else {
            TransportMode::PlatformRoots
        }
    }
}

/// Builds the rumqttc transport for a mode.
pub fn transport_for(mode: &TransportMode) -> Result<Transport> {
    match mode {
        TransportMode::Plain => Ok(Transport::Tcp),
        TransportMode::VerifiedWithCa(path) => {
            let ca = std::fs::read(path).map_err(|e| {
                Error::TlsConfiguration(format!(
                    "cannot read CA certificate {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!("TLS enabled with CA cert: {}", path.display());
            Ok(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }))
        }
        TransportMode::PlatformRoots => {
            info!("TLS enabled with platform trust roots");
            Ok(Transport::Tls(TlsConfiguration::default()))
        }
        TransportMode::Unverified => {
            warn!("TLS enabled WITHOUT server certificate verification (insecure mode)");
            TLS_DEGRADED_TOTAL.inc();
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth();
            Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(config),
            )))
        }
    }
}

/// Accepts every server certificate. Only reachable through `Unverified`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_disabled_is_plain() {
        let settings = TlsSettings {
            enabled: false,
            ca_cert_path: Some(PathBuf::from("/does/not/matter.pem")),
            insecure_skip_verify: true,
        };
        assert_eq!(settings.mode(), TransportMode::Plain);
        assert!(matches!(
            transport_for(&settings.mode()).unwrap(),
            Transport::Tcp
        ));
    }

    #[test]
    fn test_existing_ca_is_used() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();

        let settings = TlsSettings {
            enabled: true,
            ca_cert_path: Some(ca.path().to_path_buf()),
            insecure_skip_verify: true,
        };
        let mode = settings.mode();
        assert_eq!(mode, TransportMode::VerifiedWithCa(ca.path().to_path_buf()));

        match transport_for(&mode).unwrap() {
            Transport::Tls(TlsConfiguration::Simple { ca: bytes, .. }) => {
                assert!(bytes.starts_with(b"-----BEGIN CERTIFICATE-----"));
            }
            _ => panic!("expected CA-verified TLS"),
        }
    }

    #[test]
    fn test_missing_ca_without_opt_in_keeps_verification() {
        let settings = TlsSettings {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            insecure_skip_verify: false,
        };
        assert_eq!(settings.mode(), TransportMode::PlatformRoots);

        let settings = TlsSettings {
            enabled: true,
            ca_cert_path: None,
            insecure_skip_verify: false,
        };
        assert_eq!(settings.mode(), TransportMode::PlatformRoots);
    }

    #[test]
    fn test_missing_ca_with_opt_in_is_unverified() {
        let settings = TlsSettings {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            insecure_skip_verify: true,
        };
        assert_eq!(settings.mode(), TransportMode::Unverified);

        let before = TLS_DEGRADED_TOTAL.get();
        let transport = transport_for(&TransportMode::Unverified).unwrap();
        assert!(matches!(
            transport,
            Transport::Tls(TlsConfiguration::Rustls(_))
        ));
        assert!(TLS_DEGRADED_TOTAL.get() > before);
    }

    #[test]
    fn test_unreadable_ca_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mode = TransportMode::VerifiedWithCa(dir.path().join("gone.pem"));
        assert!(matches!(
            transport_for(&mode),
            Err(Error::TlsConfiguration(_))
        ));
    }
}
