//! Shared test double: a scripted rendezvous server behind real TLS.
//!
//! Each test spins one up on an ephemeral port with a generated
//! self-signed certificate, points a session at it, and asserts on what
//! the session observed. The secret the server read is reported back so
//! tests can verify it matches the attach URL.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use skyhook_rendezvous::PinnedCertificate;

/// A generated self-signed identity for the test server.
pub struct TestIdentity {
    pub cert_der: CertificateDer<'static>,
    pub cert_pem: String,
    pub key_der: PrivateKeyDer<'static>,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "rendezvous test server");
        params.subject_alt_names = vec![rcgen::SanType::DnsName("localhost".try_into().unwrap())];
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_der: PrivateKeyDer::Pkcs8(key_pair.serialize_der().into()),
        }
    }

    /// A session trust anchor pinning this identity.
    pub fn pinned(&self) -> PinnedCertificate {
        PinnedCertificate::from_der(self.cert_der.clone()).unwrap()
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], self.key_der.clone_key())
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

/// What the scripted server sends once it has read the secret.
pub enum Script {
    /// Standard greeting, then these chunks, then a clean close.
    Greet(Vec<Vec<u8>>),
    /// Raw writes verbatim (no implied greeting), then a clean close.
    /// Writes are spaced out so they hit the client as separate reads.
    Raw(Vec<Vec<u8>>),
    /// Greeting plus chunks, then hold the connection open until the
    /// client goes away.
    GreetThenStall(Vec<Vec<u8>>),
}

pub struct TestServer {
    pub port: u16,
    /// Resolves to the secret bytes the server read from the client.
    pub secret: oneshot::Receiver<Vec<u8>>,
}

impl TestServer {
    /// Binds an ephemeral port and serves a single scripted connection.
    pub async fn spawn(identity: &TestIdentity, secret_len: usize, script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = identity.acceptor();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let Ok(mut tls) = acceptor.accept(tcp).await else {
                return;
            };

            let mut secret = vec![0u8; secret_len];
            tls.read_exact(&mut secret).await.unwrap();
            let _ = tx.send(secret);

            match script {
                Script::Greet(chunks) => {
                    tls.write_all(b"rendezvous\n").await.unwrap();
                    tls.flush().await.unwrap();
                    for chunk in chunks {
                        tls.write_all(&chunk).await.unwrap();
                        tls.flush().await.unwrap();
                    }
                    let _ = tls.shutdown().await;
                }
                Script::Raw(writes) => {
                    for bytes in writes {
                        tls.write_all(&bytes).await.unwrap();
                        tls.flush().await.unwrap();
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    let _ = tls.shutdown().await;
                }
                Script::GreetThenStall(chunks) => {
                    tls.write_all(b"rendezvous\n").await.unwrap();
                    for chunk in chunks {
                        tls.write_all(&chunk).await.unwrap();
                    }
                    tls.flush().await.unwrap();
                    // Wait for the client to disconnect.
                    let mut buf = [0u8; 16];
                    let _ = tls.read(&mut buf).await;
                }
            }
        });

        Self { port, secret: rx }
    }
}

/// Attach URL for a server on `port` with the given secret.
pub fn attach_url(port: u16, secret: &str) -> String {
    format!("rendezvous://localhost:{port}/{secret}")
}
