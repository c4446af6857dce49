//! ## RTP Control Protocol -- RTCP
//!
//! RTCP is based on the periodic transmission of control packets to all
//! participants in the session, using the same distribution mechanism
//! as the data packets.  All RTCP packets MUST be sent in a compound
//! packet of at least two individual packets: a report packet (SR or
//! RR) first, followed by a source description packet containing at
//! least the canonical name (CNAME) of the sender.  Other packets
//! (BYE, APP, or types unknown to this implementation) may follow; a
//! BYE always ends the compound.

pub mod app;
pub mod bye;
pub mod rr;
pub mod sdes;
pub mod sr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;

use crate::Error;

pub use self::{
    app::App,
    bye::Goodbye,
    rr::{ReceiverReport, ReceptionReport},
    sdes::{Sdes, SdesChunk, SdesItem, SdesItemType},
    sr::SenderReport,
};

const VERSION_MASK: u8 = 0b11000000;
const PADDING_MASK: u8 = 0b00100000;
const COUNT_MASK: u8 = 0b00011111;

/// RTCP packet type octets registered by RFC 3550.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum PacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    App = 204,
}

/// Write the 4-byte common header shared by all RTCP packets.
///
/// `size` is the full encoded size of the packet, header included; the
/// wire carries it as a count of 32-bit words minus one.
fn put_header(buf: &mut BytesMut, packet_type: u8, count: u8, size: usize) {
    buf.put_u8((2 << 6) | (count & COUNT_MASK));
    buf.put_u8(packet_type);
    buf.put_u16((size / 4 - 1) as u16);
}

/// One primitive packet of a compound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(Sdes),
    Goodbye(Goodbye),
    App(App),
    /// A packet type this implementation does not understand; carried
    /// through verbatim so translators keep working.
    Unknown { packet_type: u8, body: Bytes },
}

impl RtcpPacket {
    pub fn len(&self) -> usize {
        match self {
            Self::SenderReport(it) => it.len(),
            Self::ReceiverReport(it) => it.len(),
            Self::SourceDescription(it) => it.len(),
            Self::Goodbye(it) => it.len(),
            Self::App(it) => it.len(),
            Self::Unknown { body, .. } => 4 + body.len(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        match self {
            Self::SenderReport(it) => it.encode(buf)?,
            Self::ReceiverReport(it) => it.encode(buf)?,
            Self::SourceDescription(it) => it.encode(buf)?,
            Self::Goodbye(it) => it.encode(buf)?,
            Self::App(it) => it.encode(buf)?,
            Self::Unknown { packet_type, body } => {
                if body.len() % 4 != 0 {
                    return Err(Error::MalformedRtcp);
                }

                put_header(buf, *packet_type, 0, 4 + body.len());
                buf.put(body.clone());
            }
        }

        Ok(())
    }
}

/// A compound RTCP packet: the concatenation of primitive packets sent
/// as a single datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound(pub Vec<RtcpPacket>);

impl Compound {
    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.iter().map(|it| it.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a compound packet.
    ///
    /// Every primitive header is validated against the remaining
    /// buffer; a length field that would overrun fails the whole
    /// compound with [`Error::MalformedRtcp`].
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use rtp_session_codec::rtcp::{Compound, RtcpPacket};
    ///
    /// let buffer: &[u8] = &[
    ///     // RR, no report blocks
    ///     0x80, 0xc9, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44,
    ///     // SDES with a CNAME chunk for 0x11223344
    ///     0x81, 0xca, 0x00, 0x03, 0x11, 0x22, 0x33, 0x44,
    ///     0x01, 0x04, 0x61, 0x40, 0x62, 0x63, 0x00, 0x00,
    /// ];
    ///
    /// let compound = Compound::decode(Bytes::copy_from_slice(buffer)).unwrap();
    /// assert_eq!(compound.0.len(), 2);
    /// assert!(compound.validate().is_ok());
    /// assert!(matches!(compound.0[0], RtcpPacket::ReceiverReport(_)));
    /// ```
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.is_empty() {
            return Err(Error::EmptyCompound);
        }

        let mut packets = Vec::with_capacity(4);
        while !buf.is_empty() {
            if buf.len() < 4 {
                return Err(Error::MalformedRtcp);
            }

            if (buf[0] & VERSION_MASK) >> 6 != 2 {
                return Err(Error::BadVersion);
            }

            let has_padding = buf[0] & PADDING_MASK != 0;
            let count = buf[0] & COUNT_MASK;
            let packet_type = buf[1];
            let size = ((((buf[2] as usize) << 8) | buf[3] as usize) + 1) * 4;
            if size > buf.len() {
                return Err(Error::MalformedRtcp);
            }

            let mut body = buf.slice(4..size);
            buf.advance(size);

            // Padding is only legal on the last packet of a compound
            // but stripping it per packet keeps translators lenient.
            if has_padding {
                let pad = match body.last() {
                    Some(it) => *it as usize,
                    None => return Err(Error::MalformedRtcp),
                };

                if pad == 0 || pad > body.len() {
                    return Err(Error::MalformedRtcp);
                }

                body.truncate(body.len() - pad);
            }

            packets.push(match PacketType::try_from(packet_type) {
                Ok(PacketType::SenderReport) => {
                    RtcpPacket::SenderReport(SenderReport::decode(count, body)?)
                }
                Ok(PacketType::ReceiverReport) => {
                    RtcpPacket::ReceiverReport(ReceiverReport::decode(count, body)?)
                }
                Ok(PacketType::SourceDescription) => {
                    RtcpPacket::SourceDescription(Sdes::decode(count, body)?)
                }
                Ok(PacketType::Goodbye) => RtcpPacket::Goodbye(Goodbye::decode(count, body)?),
                Ok(PacketType::App) => RtcpPacket::App(App::decode(count, body)?),
                Err(_) => RtcpPacket::Unknown { packet_type, body },
            });
        }

        Ok(Self(packets))
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        self.validate()?;
        for packet in &self.0 {
            packet.encode(buf)?;
        }

        Ok(())
    }

    /// Structural rules every compound has to satisfy: it starts with a
    /// report packet, carries a CNAME for every reporting source, and a
    /// BYE can only be the final packet.
    pub fn validate(&self) -> Result<(), Error> {
        match self.0.first() {
            None => return Err(Error::EmptyCompound),
            Some(RtcpPacket::SenderReport(_)) | Some(RtcpPacket::ReceiverReport(_)) => {}
            Some(_) => return Err(Error::BadCompoundStart),
        }

        for ssrc in self.reporting_ssrcs() {
            if !self.has_cname(ssrc) {
                return Err(Error::MissingCname);
            }
        }

        for (index, packet) in self.0.iter().enumerate() {
            if matches!(packet, RtcpPacket::Goodbye(_)) && index + 1 != self.0.len() {
                return Err(Error::MalformedRtcp);
            }
        }

        Ok(())
    }

    fn reporting_ssrcs(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().filter_map(|packet| match packet {
            RtcpPacket::SenderReport(it) => Some(it.ssrc),
            RtcpPacket::ReceiverReport(it) => Some(it.ssrc),
            _ => None,
        })
    }

    fn has_cname(&self, ssrc: u32) -> bool {
        self.0.iter().any(|packet| match packet {
            RtcpPacket::SourceDescription(sdes) => sdes.chunks.iter().any(|chunk| {
                chunk.ssrc == ssrc
                    && chunk
                        .items
                        .iter()
                        .any(|item| item.kind == SdesItemType::Cname)
            }),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_overrun() {
        // claims 3 words (12 bytes) but only 8 are present
        let buf: &[u8] = &[0x80, 0xc9, 0x00, 0x02, 0, 0, 0, 0];

        assert_eq!(
            Compound::decode(Bytes::copy_from_slice(buf)),
            Err(Error::MalformedRtcp)
        );
    }

    #[test]
    fn carries_unknown_packets() {
        let buf: &[u8] = &[
            0x80, 0xc9, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44,
            0x80, 0xd0, 0x00, 0x01, 0xaa, 0xbb, 0xcc, 0xdd,
        ];

        let compound = Compound::decode(Bytes::copy_from_slice(buf)).unwrap();
        assert!(matches!(
            compound.0[1],
            RtcpPacket::Unknown { packet_type: 208, .. }
        ));
    }

    #[test]
    fn round_trip_preserves_order() {
        let compound = Compound(vec![
            RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: 1,
                reports: vec![],
            }),
            RtcpPacket::SourceDescription(Sdes {
                chunks: vec![SdesChunk {
                    ssrc: 1,
                    items: vec![SdesItem::new(SdesItemType::Cname, b"a@b")],
                }],
            }),
            RtcpPacket::Goodbye(Goodbye {
                sources: vec![1],
                reason: Bytes::from_static(b"done"),
            }),
        ]);

        let mut buf = BytesMut::new();
        compound.encode(&mut buf).unwrap();

        let back = Compound::decode(buf.freeze()).unwrap();
        assert_eq!(back, compound);
    }
}
