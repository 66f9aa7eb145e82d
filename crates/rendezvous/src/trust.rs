//! Pinned trust anchor for the rendezvous endpoint.
//!
//! The rendezvous server authenticates with one known certificate rather
//! than a public CA chain. The verifier here accepts exactly that
//! certificate: chain building is replaced by byte equality on the
//! presented leaf, while handshake signature checks still go through the
//! crypto provider. A mismatch is a hard failure with no fallback.

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use crate::error::RendezvousError;

/// The single server certificate a [`Transport`](crate::Transport) will
/// accept. Load it once per process and hand a clone to each session.
#[derive(Clone, Debug)]
pub struct PinnedCertificate {
    client_config: Arc<ClientConfig>,
}

impl PinnedCertificate {
    /// Loads the pinned certificate from PEM bytes.
    ///
    /// The input must contain exactly one certificate.
    pub fn from_pem_bytes(pem: &[u8]) -> Result<Self, RendezvousError> {
        let mut certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                RendezvousError::Tls(format!("failed to parse pinned certificate: {e}"))
            })?;

        let pinned = certs
            .pop()
            .ok_or_else(|| RendezvousError::Tls("no certificate found in PEM input".into()))?;
        if !certs.is_empty() {
            return Err(RendezvousError::Tls(
                "expected exactly one pinned certificate".into(),
            ));
        }

        Self::from_der(pinned)
    }

    /// Loads the pinned certificate from a PEM file on disk.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, RendezvousError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            RendezvousError::Tls(format!("failed to read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded pinned certificate");
        Self::from_pem_bytes(&pem)
    }

    /// Pins an already-parsed DER certificate.
    pub fn from_der(pinned: CertificateDer<'static>) -> Result<Self, RendezvousError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(PinnedServerVerifier {
            pinned,
            provider: provider.clone(),
        });

        // The rendezvous server speaks a single protocol version.
        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| RendezvousError::Tls(format!("client config error: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    pub(crate) fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }
}

/// Accepts exactly the pinned certificate, rejecting everything else.
#[derive(Debug)]
struct PinnedServerVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
