//! Client for the rendezvous remote-command attach protocol.
//!
//! When the platform API starts a remote command with attach semantics it
//! returns an attach URL. A [`Rendezvous`] session parses that URL, opens
//! a TLS connection pinned to the rendezvous server's certificate, proves
//! entitlement with the one-time secret from the URL, and then streams the
//! command's stdout/stderr back until the remote side closes.
//!
//! Two consumption modes run over the same handshake and read loop:
//! [`Rendezvous::start`] collects the whole stream into one buffer, and
//! [`Rendezvous::stream`] yields output line by line as it arrives.

mod echo;
mod error;
mod session;
mod transport;
mod trust;

pub use error::RendezvousError;
pub use session::{OutputLines, Rendezvous};
pub use transport::Transport;
pub use trust::PinnedCertificate;
