use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, put_header, rr::ReceptionReport};
use crate::{Error, time::NtpTime};

/// Sender report, for participants that are active senders.
///
/// Carries the 20-byte sender information section between the common
/// header and the reception report blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// The synchronization source identifier for the originator of this
    /// SR packet.
    pub ssrc: u32,
    /// Indicates the wallclock time when this report was sent so that
    /// it may be used in combination with timestamps returned in
    /// reception reports from other receivers to measure round-trip
    /// propagation to those receivers.
    pub ntp_timestamp: NtpTime,
    /// Corresponds to the same time as the NTP timestamp (above), but
    /// in the same units and with the same random offset as the RTP
    /// timestamps in data packets.
    pub rtp_timestamp: u32,
    /// The total number of RTP data packets transmitted by the sender
    /// since starting transmission up until the time this SR packet was
    /// generated.  The count SHOULD be reset if the sender changes its
    /// SSRC identifier.
    pub packet_count: u32,
    /// The total number of payload octets (i.e., not including header
    /// or padding) transmitted in RTP data packets by the sender since
    /// starting transmission.
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
}

impl SenderReport {
    pub fn len(&self) -> usize {
        28 + self.reports.len() * ReceptionReport::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub(super) fn decode(count: u8, mut body: Bytes) -> Result<Self, Error> {
        if body.len() < 24 + count as usize * ReceptionReport::SIZE {
            return Err(Error::MalformedRtcp);
        }

        let ssrc = body.get_u32();
        let ntp_timestamp = NtpTime::from_u64(body.get_u64());
        let rtp_timestamp = body.get_u32();
        let packet_count = body.get_u32();
        let octet_count = body.get_u32();
        let reports = (0..count)
            .map(|_| ReceptionReport::decode(&mut body))
            .collect();

        Ok(Self {
            ssrc,
            ntp_timestamp,
            rtp_timestamp,
            packet_count,
            octet_count,
            reports,
        })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.reports.len() > 31 {
            return Err(Error::TooManyReports);
        }

        put_header(
            buf,
            PacketType::SenderReport as u8,
            self.reports.len() as u8,
            self.len(),
        );

        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_timestamp.as_u64());
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
        for report in &self.reports {
            report.encode(buf);
        }

        Ok(())
    }
}
