//! ## rtp-session
//!
//! An RTP/RTCP session runtime per RFC 3550: applications send and
//! receive media payloads with correct sequencing, timestamping and
//! source identification, while the library runs the control plane
//! underneath: participant bookkeeping, SSRC collision resolution,
//! and the randomized RTCP transmission schedule with reverse
//! reconsideration and BYE backoff.
//!
//! The wire codecs live in the `codec` crate, the session state
//! machines (source table, scheduler, packet builders) in the
//! `service` crate; this crate adds the transports and the
//! application-facing [`Session`].

pub mod config;
pub mod error;
pub mod observer;
pub mod session;
pub mod transport;

pub use codec;
pub use service;

pub use self::{
    config::SessionConfig,
    error::Error,
    observer::Observer,
    session::{Session, SourceInfo},
    transport::{
        ExternalParams, RawPacket, ReceiveMode, RtpAddress, TcpParams, TransmitterParams,
        UdpParams,
    },
};
