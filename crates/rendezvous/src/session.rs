//! Rendezvous session: handshake and streaming read loop.
//!
//! The session walks one connection through connect, secret, greeting and
//! streaming. Collect mode drains the stream into a buffer; iterate mode
//! hands out lines as they arrive. Both run over the same attach path so
//! the handshake and framing logic exist once.

use std::time::Duration;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use skyhook_protocol::constants::{GREETING_TOKEN, MAX_GREETING_LEN, READ_CHUNK_SIZE};
use skyhook_protocol::endpoint::Endpoint;

use crate::echo::{EchoSink, trim_line_end};
use crate::error::RendezvousError;
use crate::transport::Transport;
use crate::trust::PinnedCertificate;

/// A single attach to a remote command's output stream.
///
/// One session owns one connection for its whole lifetime. Sessions are
/// not resumable: once the stream ends or fails, attaching again needs a
/// fresh attach URL from the platform API, since the secret is spent.
#[derive(Debug)]
pub struct Rendezvous {
    endpoint: Endpoint,
    pinned: PinnedCertificate,
    echo: bool,
    connect_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Rendezvous {
    /// Creates a session from the attach URL returned by the platform API.
    ///
    /// The URL is parsed eagerly: a malformed URL is an upstream contract
    /// violation and surfaces before any connection attempt.
    pub fn new(attach_url: &str, pinned: PinnedCertificate) -> Result<Self, RendezvousError> {
        let endpoint = Endpoint::parse(attach_url)?;
        Ok(Self {
            endpoint,
            pinned,
            echo: false,
            connect_timeout: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Mirrors received output to stdout as it arrives, line by line.
    /// Off by default; mirroring never changes what the session returns.
    #[must_use]
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Bounds the TCP connect plus TLS handshake. Without a bound the
    /// connection attempt blocks until the peer answers. The stream phase
    /// itself has no deadline; it runs until EOF or a transport error.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Token for aborting the session from outside. Cancelling it makes an
    /// in-flight read fail promptly with [`RendezvousError::Read`] and
    /// closes the transport.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The parsed endpoint this session will attach to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Collect mode: attaches and drains the stream to completion.
    ///
    /// Returns every byte the remote command produced, exactly as
    /// received, once the server closes the stream. On failure partial
    /// data is discarded rather than returned as a complete capture.
    pub async fn start(self) -> Result<Vec<u8>, RendezvousError> {
        let echo = self.echo;
        let cancel = self.cancel.clone();
        let (mut transport, first) = self.attach().await?;

        let mut sink = echo.then(EchoSink::stdout);
        let mut buffer = first;
        if let Some(sink) = sink.as_mut() {
            sink.push(&buffer);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = match read_or_cancelled(&mut transport, &cancel, &mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    transport.close().await;
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            if let Some(sink) = sink.as_mut() {
                sink.push(&chunk[..n]);
            }
            buffer.extend_from_slice(&chunk[..n]);
        }

        if let Some(sink) = sink.as_mut() {
            sink.finish();
        }
        transport.close().await;
        debug!(bytes = buffer.len(), "rendezvous stream complete");
        Ok(buffer)
    }

    /// Iterate mode: attaches and returns a line-by-line view of the
    /// stream. Each [`OutputLines::next_line`] call blocks until a line
    /// boundary is seen or the stream ends.
    pub async fn stream(self) -> Result<OutputLines, RendezvousError> {
        let echo = self.echo;
        let cancel = self.cancel.clone();
        let (transport, first) = self.attach().await?;
        Ok(OutputLines {
            transport,
            cancel,
            sink: echo.then(EchoSink::stdout),
            pending: first,
            eof: false,
        })
    }

    /// Shared attach path: connect, send the secret, verify the greeting.
    ///
    /// On success returns the transport in streaming state together with
    /// any payload bytes that arrived after the greeting line. The
    /// transport is closed before every error return.
    async fn attach(self) -> Result<(Transport, Vec<u8>), RendezvousError> {
        let mut transport =
            Transport::connect(&self.endpoint, &self.pinned, self.connect_timeout).await?;

        // The secret goes out exactly once, before anything is read.
        if let Err(e) = transport.write_all(self.endpoint.secret.as_bytes()).await {
            transport.close().await;
            return Err(e);
        }

        match read_greeting(&mut transport).await {
            Ok(first) => {
                debug!("rendezvous greeting verified");
                Ok((transport, first))
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }
}

/// Line-by-line view of a rendezvous stream (iterate mode).
///
/// The sequence is finite and forward-only: once [`next_line`] returns
/// `Ok(None)` the stream is over, and attaching again needs a new session.
///
/// [`next_line`]: OutputLines::next_line
pub struct OutputLines {
    transport: Transport,
    cancel: CancellationToken,
    sink: Option<EchoSink>,
    pending: Vec<u8>,
    eof: bool,
}

impl OutputLines {
    /// Waits for the next complete line.
    ///
    /// Line terminators are stripped and invalid UTF-8 is replaced. A
    /// final unterminated line is yielded before the sequence ends.
    pub async fn next_line(&mut self) -> Result<Option<String>, RendezvousError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(Some(self.emit(&raw)));
            }

            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.pending);
                return Ok(Some(self.emit(&raw)));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = match read_or_cancelled(&mut self.transport, &self.cancel, &mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.transport.close().await;
                    return Err(e);
                }
            };
            if n == 0 {
                self.eof = true;
                self.transport.close().await;
                trace!("rendezvous stream ended");
            } else {
                self.pending.extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Adapts the remaining lines into a [`Stream`], ending after the
    /// first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, RendezvousError>> {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut lines = state?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(lines))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn emit(&mut self, raw: &[u8]) -> String {
        if let Some(sink) = self.sink.as_mut() {
            sink.push(raw);
            if !raw.ends_with(b"\n") {
                sink.finish();
            }
        }
        String::from_utf8_lossy(trim_line_end(raw)).into_owned()
    }
}

/// Reads until the greeting line is complete and checks it begins with
/// [`GREETING_TOKEN`]. Returns the payload bytes that followed the line.
async fn read_greeting(transport: &mut Transport) -> Result<Vec<u8>, RendezvousError> {
    let mut received = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match check_greeting(&received) {
            GreetingCheck::Accepted { payload_start } => {
                return Ok(received.split_off(payload_start));
            }
            GreetingCheck::Rejected => {
                warn!(bytes = received.len(), "rendezvous greeting mismatch");
                return Err(RendezvousError::InvalidGreeting { received });
            }
            GreetingCheck::Incomplete => {}
        }

        let n = transport.read_chunk(&mut chunk).await?;
        if n == 0 {
            // Dropped before the greeting, which is not the same failure
            // as a wrong greeting.
            return Err(RendezvousError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before rendezvous greeting",
            )));
        }
        received.extend_from_slice(&chunk[..n]);
    }
}

/// Outcome of inspecting the bytes received while awaiting the greeting.
#[derive(Debug, PartialEq)]
enum GreetingCheck {
    /// Greeting line complete and valid; payload begins at this offset.
    Accepted { payload_start: usize },
    /// The received bytes cannot be a valid greeting.
    Rejected,
    /// Not enough bytes to decide yet.
    Incomplete,
}

fn check_greeting(received: &[u8]) -> GreetingCheck {
    if let Some(pos) = received.iter().position(|&b| b == b'\n') {
        if received[..pos].starts_with(GREETING_TOKEN) {
            return GreetingCheck::Accepted {
                payload_start: pos + 1,
            };
        }
        return GreetingCheck::Rejected;
    }

    // No terminator yet. Reject as soon as the prefix diverges from the
    // token, or the line outgrows any plausible greeting.
    let probe = received.len().min(GREETING_TOKEN.len());
    if received[..probe] != GREETING_TOKEN[..probe] {
        return GreetingCheck::Rejected;
    }
    if received.len() > MAX_GREETING_LEN {
        return GreetingCheck::Rejected;
    }
    GreetingCheck::Incomplete
}

/// Reads the next chunk unless the session is cancelled first.
///
/// Cancellation is the out-of-band close: the in-flight read fails
/// promptly instead of hanging until the server gives up.
async fn read_or_cancelled(
    transport: &mut Transport,
    cancel: &CancellationToken,
    buf: &mut [u8],
) -> Result<usize, RendezvousError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RendezvousError::Read(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "rendezvous session cancelled",
        ))),
        n = transport.read_chunk(buf) => n,
    }
}
