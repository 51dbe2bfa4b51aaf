//! Point-to-point, message-framed, strictly alternating request/reply
//! connections over loopback TCP.

mod channel;
mod frame;
mod server;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use channel::Channel;
pub use frame::{Frame, FrameReader, HEADER_LEN};
pub use server::{ChannelListener, ChannelServer, FrameHandler, Response, ServerChannel};

/// Default rendezvous port for the event channel.
pub const DEFAULT_EVENT_PORT: u16 = 5555;

/// Default port for the RPC channel.
pub const DEFAULT_RPC_PORT: u16 = 5556;

/// Upper bound on a single frame payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("no reply within {0:?}")]
    ReceiveTimeout(Duration),

    #[error("channel is closed")]
    Closed,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the channel cannot carry another round trip.
    ///
    /// A receive timeout leaves the channel usable: the late reply is
    /// recognised by its sequence number and discarded.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::ReceiveTimeout(_))
    }
}

pub(crate) fn is_timeout_kind(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Timeouts and limits for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Bound for connect, for each send and for each receive.
    pub timeout: Duration,
    /// How long close keeps draining the socket before dropping it.
    pub linger: Duration,
    pub max_frame_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            linger: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// One strictly alternating request/reply exchange.
///
/// Implementations serialise concurrent callers so that request and reply
/// frames of different callers never interleave.
pub trait RoundTrip: Send + Sync {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Releases the connection. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool {
        true
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).round_trip(request)
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Box<T> {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).round_trip(request)
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
