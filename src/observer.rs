use bytes::Bytes;
use codec::{
    rtcp::{Compound, SdesItemType},
    rtp::RtpPacket,
    time::RtpTime,
};

use crate::{error::Error, transport::RawPacket, transport::RtpAddress};

/// The override points of a session.
///
/// A session is parameterized by one observer instead of being
/// subclassed; every default implementation is inert, so an embedding
/// only writes the callbacks it cares about.  Callbacks run on the
/// thread (or task) driving the poll loop and must not call back into
/// the session.
#[allow(unused)]
pub trait Observer: Send + Sync {
    /// An RTP packet passed sequence validation for `ssrc`.  Return
    /// true to consume it; returning false leaves the packet in the
    /// source's queue for `get_next_packet`.  Packets from a source
    /// still on probation are flagged and never queued.
    fn on_validated_rtp_packet(&self, ssrc: u32, packet: &RtpPacket, on_probation: bool) -> bool {
        false
    }

    /// An SDES item arrived and was stored on its source.
    fn on_rtcp_sdes_item(&self, ssrc: u32, kind: SdesItemType, value: &[u8]) {}

    /// A whole RTCP compound packet arrived, before its parts were
    /// applied to the source table.
    fn on_rtcp_compound_packet(&self, compound: &Compound, receive_time: RtpTime) {}

    /// An RTCP compound packet of ours just went out.
    fn on_send_rtcp_compound_packet(&self, compound: &Compound) {}

    /// A BYE arrived for a known source.
    fn on_bye(&self, ssrc: u32, reason: &[u8]) {}

    fn on_new_source(&self, ssrc: u32) {}

    fn on_remove_source(&self, ssrc: u32) {}

    /// A source went silent past the member timeout and is about to be
    /// removed.
    fn on_timeout(&self, ssrc: u32) {}

    /// A packet claimed an SSRC already owned by another participant
    /// (possibly our own; the session rotates its identity by itself).
    fn on_ssrc_collision(&self, ssrc: u32, is_rtp: bool) {}

    /// Two different sources presented the same CNAME.
    fn on_cname_collision(&self, ssrc: u32, cname: &[u8]) {}

    /// First look at a raw packet, before any parsing; return false to
    /// drop it.  The buffer may be rewritten in place, which is where
    /// an SRTP unprotect step plugs in.
    fn on_change_incoming_data(&self, packet: &mut RawPacket) -> bool {
        true
    }

    /// Last look at outgoing data before it reaches the transport;
    /// the returned buffer is what actually gets sent.  The SRTP
    /// protect seam.
    fn on_change_rtp_or_rtcp_data(&self, data: Bytes, is_rtp: bool) -> Bytes {
        data
    }

    /// Outgoing data left the transport.
    fn on_sent_rtp_or_rtcp_data(&self, data: &[u8], is_rtp: bool) {}

    /// A receive-side failure on `addr`; for stream transports the
    /// destination is already removed when this fires.
    fn on_receive_error(&self, addr: &RtpAddress) {}

    /// A send-side failure on `addr`.
    fn on_send_error(&self, addr: &RtpAddress) {}

    /// One iteration of the internal poll task finished.
    fn on_poll_thread_step(&self) {}

    /// The internal poll task hit an error it could not absorb.
    fn on_poll_thread_error(&self, error: &Error) {}
}
