//! Attach URL parsing.
//!
//! The platform API hands back an attach URL of the form
//! `scheme://host:port/secret` when a remote command is started with
//! attach semantics. [`Endpoint`] extracts the connection target and the
//! one-time secret from it.

use url::Url;

/// Errors from parsing an attach URL.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid attach URL: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("attach URL has no host")]
    MissingHost,

    #[error("attach URL has no port")]
    MissingPort,

    #[error("attach URL has no secret in its path")]
    MissingSecret,
}

/// Connection target and secret for one rendezvous session.
///
/// Constructed once per session from the attach URL and immutable after
/// that. The secret is a single-use capability token, not a credential:
/// it entitles the holder to attach to one specific command's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secret: String,
}

impl Endpoint {
    /// Parses an attach URL.
    ///
    /// The secret is everything after the leading `/` of the path,
    /// interior slashes included. The port may only be omitted when the
    /// scheme has a registered default.
    pub fn parse(attach_url: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(attach_url)?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(EndpointError::MissingHost),
        };
        let port = url
            .port_or_known_default()
            .ok_or(EndpointError::MissingPort)?;

        let secret = url.path().trim_start_matches('/');
        if secret.is_empty() {
            return Err(EndpointError::MissingSecret);
        }

        Ok(Self {
            host,
            port,
            secret: secret.to_string(),
        })
    }
}
