//! Error taxonomy for rendezvous sessions.

use std::time::Duration;

use skyhook_protocol::endpoint::EndpointError;

/// Errors from a rendezvous session.
///
/// Clean end-of-stream is not an error: collect mode returns the captured
/// buffer and iterate mode ends the line sequence instead. Everything here
/// is terminal for the session; the secret is single-use, so there is no
/// internal retry or reconnect.
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    /// The attach URL could not be parsed into host, port and secret.
    #[error("malformed attach URL: {0}")]
    MalformedEndpoint(#[from] EndpointError),

    /// TCP connect plus TLS handshake did not finish within the bound.
    #[error("connecting to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// The connection could not be established at all.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The server presented a certificate other than the pinned one.
    #[error("rendezvous server presented an untrusted certificate: {reason}")]
    UntrustedServer { reason: String },

    /// The server's first line did not start with the greeting token.
    /// Carries the raw bytes received for diagnostics.
    #[error("unexpected greeting from rendezvous server: {}", String::from_utf8_lossy(.received))]
    InvalidGreeting { received: Vec<u8> },

    /// Writing to the transport failed.
    #[error("write to rendezvous transport failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading from the transport failed. Distinct from a clean peer
    /// close, which ends the stream without error.
    #[error("read from rendezvous transport failed: {0}")]
    Read(#[source] std::io::Error),

    /// The pinned certificate could not be loaded or the TLS client
    /// configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
