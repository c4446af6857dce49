//! Session-state machinery for an RTP/RTCP endpoint: the source table,
//! the RTCP transmission scheduler, and the builders that turn local
//! state into outgoing RTP packets and RTCP compounds.
//!
//! Everything in this crate is transport-agnostic and synchronous; the
//! session layer owns the instances, serializes access to them, and
//! wires their notifications to the application.

pub mod builder;
pub mod random;
pub mod rtcp;
pub mod scheduler;
pub mod sources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    PacketTooLarge,
    InvalidPayloadType,
    DefaultNotSet,
    SdesItemTooLong,
    Codec(codec::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

/// A snapshot of the group size estimate the scheduler works from.
#[derive(Debug, Clone, Copy)]
pub struct GroupState {
    pub members: usize,
    pub senders: usize,
    pub we_sent: bool,
}
