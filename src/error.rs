use std::io;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`Holepunch::connect`](crate::tcp::Holepunch::connect) and the codec.
#[derive(Debug, Error)]
pub enum Error {
    /// The relay or local address could not be parsed or resolved.
    #[error("cannot resolve address {addr}: {reason}")]
    AddressResolution { addr: String, reason: String },

    /// The reuse-port listener could not be set up.
    #[error("cannot bind local listener: {0}")]
    Bind(#[source] io::Error),

    /// An outbound connection attempt failed.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// An identifier does not fit the one byte length prefix.
    #[error("identifier is {len} bytes long (max 255)")]
    IdentifierTooLong { len: usize },

    /// `CreateSession` only carries IPv4 local addresses.
    #[error("local address {0} is not IPv4")]
    UnsupportedAddress(IpAddr),

    /// A relay frame was too short or otherwise malformed.
    #[error("framing error: {reason}")]
    Framing { reason: String },

    /// The relay connection was closed or failed.
    #[error("relay connection lost: {0}")]
    RelayConnectionLost(#[source] io::Error),

    /// No peer connection was produced before the configured deadline.
    #[error("no peer connection after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn framing<S: Into<String>>(reason: S) -> Self {
        Error::Framing {
            reason: reason.into(),
        }
    }
}
