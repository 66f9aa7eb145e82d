//! Pinned-certificate TLS transport to a rendezvous endpoint.

use std::io;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace};

use skyhook_protocol::endpoint::Endpoint;

use crate::error::RendezvousError;
use crate::trust::PinnedCertificate;

/// One TLS connection to a rendezvous endpoint.
///
/// A transport is owned by exactly one session for its whole lifetime:
/// no pooling, no reuse, no sharing between sessions.
pub struct Transport {
    stream: TlsStream<TcpStream>,
    closed: bool,
}

impl Transport {
    /// Opens a TCP connection and performs the pinned TLS handshake.
    ///
    /// When `connect_timeout` is given it bounds the combined TCP connect
    /// and TLS handshake; `None` blocks until the peer answers.
    pub async fn connect(
        endpoint: &Endpoint,
        pinned: &PinnedCertificate,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, RendezvousError> {
        let handshake = Self::handshake(endpoint, pinned);
        let stream = match connect_timeout {
            Some(bound) => timeout(bound, handshake)
                .await
                .map_err(|_| RendezvousError::ConnectTimeout {
                    host: endpoint.host.clone(),
                    port: endpoint.port,
                    timeout: bound,
                })??,
            None => handshake.await?,
        };

        debug!(host = %endpoint.host, port = endpoint.port, "rendezvous transport connected");
        Ok(Self {
            stream,
            closed: false,
        })
    }

    async fn handshake(
        endpoint: &Endpoint,
        pinned: &PinnedCertificate,
    ) -> Result<TlsStream<TcpStream>, RendezvousError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| RendezvousError::Connect {
                host: endpoint.host.clone(),
                port: endpoint.port,
                source: e,
            })?;

        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            RendezvousError::Tls(format!("invalid server name {:?}: {e}", endpoint.host))
        })?;

        let connector = TlsConnector::from(pinned.client_config());
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| classify_handshake_error(e, endpoint))
    }

    /// Writes all of `bytes` before returning.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), RendezvousError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(RendezvousError::Write)?;
        self.stream.flush().await.map_err(RendezvousError::Write)
    }

    /// Reads the next chunk into `buf`.
    ///
    /// Blocks until at least one byte arrives; `Ok(0)` means the peer
    /// closed cleanly. Transient TLS rereads are retried inside rustls and
    /// never surface here.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RendezvousError> {
        let n = self
            .stream
            .read(buf)
            .await
            .map_err(RendezvousError::Read)?;
        trace!(bytes = n, "rendezvous chunk");
        Ok(n)
    }

    /// Releases the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The peer may already be gone; a shutdown failure changes nothing.
        let _ = self.stream.shutdown().await;
        debug!("rendezvous transport closed");
    }
}

/// Distinguishes a certificate pin mismatch from other handshake failures.
fn classify_handshake_error(err: io::Error, endpoint: &Endpoint) -> RendezvousError {
    let cert_rejected = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| matches!(tls, rustls::Error::InvalidCertificate(_)));

    if cert_rejected {
        RendezvousError::UntrustedServer {
            reason: err.to_string(),
        }
    } else {
        RendezvousError::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source: err,
        }
    }
}
