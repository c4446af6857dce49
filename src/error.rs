use crate::transport::RtpAddress;

/// Everything a session operation can fail with.
///
/// Parse failures on *incoming* packets never surface here; a single
/// malformed datagram must not kill the session, so those are dropped
/// with a trace log.  Transient socket errors travel through the
/// observer callbacks instead.
#[derive(Debug)]
pub enum Error {
    /// Missing or inconsistent session or transmitter parameters.
    InvalidConfig(&'static str),
    /// Operation invoked in the wrong lifecycle state.
    InvalidState(&'static str),
    /// Payload plus headers exceed the maximum packet size.
    PacketTooLarge,
    /// The short form of `send_packet` was used before the payload
    /// type, marker and timestamp increment defaults were set.
    DefaultNotSet,
    InvalidPayloadType,
    SdesItemTooLong,
    NoSuchSource,
    /// The operation only makes sense on another transmitter kind.
    Unsupported(&'static str),
    /// A wait was woken by `abort_wait` or by session destruction.
    Cancelled,
    Codec(codec::Error),
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<service::Error> for Error {
    fn from(value: service::Error) -> Self {
        match value {
            service::Error::PacketTooLarge => Self::PacketTooLarge,
            service::Error::DefaultNotSet => Self::DefaultNotSet,
            service::Error::InvalidPayloadType => Self::InvalidPayloadType,
            service::Error::SdesItemTooLong => Self::SdesItemTooLong,
            service::Error::Codec(it) => Self::Codec(it),
        }
    }
}

/// A send or receive problem on one channel, reported through the
/// observer; for stream transports the offending destination has
/// already been dropped when the callback fires.
#[derive(Debug)]
pub struct IoEvent {
    pub addr: RtpAddress,
    pub kind: IoEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEventKind {
    Receive,
    Send,
}
