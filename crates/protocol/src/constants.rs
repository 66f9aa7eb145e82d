//! Constants for the rendezvous handshake and stream.

/// Token the rendezvous server sends at the start of its first line once
/// it has accepted the secret. Anything else means the peer is not a
/// rendezvous endpoint.
pub const GREETING_TOKEN: &[u8] = b"rendezvous";

/// Read buffer size for streamed output chunks.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Upper bound on the greeting line. A server that streams past this
/// without terminating its greeting is not speaking the protocol.
pub const MAX_GREETING_LEN: usize = 512;
