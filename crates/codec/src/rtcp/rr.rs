use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, put_header};
use crate::Error;

/// One reception report block.
///
/// ```bash
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 SSRC_1 (SSRC of first source)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | fraction lost |       cumulative number of packets lost       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           extended highest sequence number received           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      interarrival jitter                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         last SR (LSR)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   delay since last SR (DLSR)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    /// The SSRC identifier of the source to which the information in
    /// this reception report block pertains.
    pub ssrc: u32,
    /// The fraction of RTP data packets from source SSRC_n lost since
    /// the previous SR or RR packet was sent, expressed as a fixed
    /// point number with the binary point at the left edge of the
    /// field.
    pub fraction_lost: u8,
    /// The total number of RTP data packets from source SSRC_n that
    /// have been lost since the beginning of reception.  This number is
    /// a signed 24-bit quantity since late or duplicated packets can
    /// make it negative.
    pub cumulative_lost: i32,
    /// The low 16 bits contain the highest sequence number received in
    /// an RTP data packet from source SSRC_n, and the most significant
    /// 16 bits extend that sequence number with the corresponding count
    /// of sequence number cycles.
    pub extended_highest_seq: u32,
    /// An estimate of the statistical variance of the RTP data packet
    /// interarrival time, measured in timestamp units and expressed as
    /// an unsigned integer.
    pub jitter: u32,
    /// The middle 32 bits out of 64 in the NTP timestamp carried by the
    /// most recent RTCP sender report from source SSRC_n.  Zero if no
    /// SR has been received yet.
    pub lsr: u32,
    /// The delay, expressed in units of 1/65536 seconds, between
    /// receiving the last SR packet from source SSRC_n and sending this
    /// reception report block.
    pub dlsr: u32,
}

impl ReceptionReport {
    pub const SIZE: usize = 24;

    pub(super) fn decode(buf: &mut Bytes) -> Self {
        let ssrc = buf.get_u32();
        let word = buf.get_u32();
        let mut cumulative_lost = (word & 0x00ff_ffff) as i32;
        if cumulative_lost & 0x0080_0000 != 0 {
            cumulative_lost -= 0x0100_0000;
        }

        Self {
            ssrc,
            fraction_lost: (word >> 24) as u8,
            cumulative_lost,
            extended_highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            lsr: buf.get_u32(),
            dlsr: buf.get_u32(),
        }
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32(
            ((self.fraction_lost as u32) << 24) | (self.cumulative_lost as u32 & 0x00ff_ffff),
        );
        buf.put_u32(self.extended_highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.lsr);
        buf.put_u32(self.dlsr);
    }
}

/// Receiver report, for participants that are not active senders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    /// The synchronization source identifier for the originator of this
    /// RR packet.
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

impl ReceiverReport {
    pub fn len(&self) -> usize {
        8 + self.reports.len() * ReceptionReport::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub(super) fn decode(count: u8, mut body: Bytes) -> Result<Self, Error> {
        if body.len() < 4 + count as usize * ReceptionReport::SIZE {
            return Err(Error::MalformedRtcp);
        }

        let ssrc = body.get_u32();
        let reports = (0..count)
            .map(|_| ReceptionReport::decode(&mut body))
            .collect();

        Ok(Self { ssrc, reports })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.reports.len() > 31 {
            return Err(Error::TooManyReports);
        }

        put_header(
            buf,
            PacketType::ReceiverReport as u8,
            self.reports.len() as u8,
            self.len(),
        );

        buf.put_u32(self.ssrc);
        for report in &self.reports {
            report.encode(buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_cumulative_lost_round_trips() {
        let report = ReceptionReport {
            ssrc: 7,
            fraction_lost: 0,
            cumulative_lost: -5,
            extended_highest_seq: 65538,
            jitter: 3,
            lsr: 0,
            dlsr: 0,
        };

        let mut buf = BytesMut::new();
        report.encode(&mut buf);

        let back = ReceptionReport::decode(&mut buf.freeze());
        assert_eq!(back, report);
    }
}
