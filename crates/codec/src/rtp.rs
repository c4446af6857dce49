use bytes::{Buf, BufMut, Bytes, BytesMut};

const MARKER_MASK: u8 = 0b10000000;
const VERSION_MASK: u8 = 0b11000000;
const PADDING_MASK: u8 = 0b00100000;
const EXTENSION_MASK: u8 = 0b00010000;
const CSRC_COUNT_MASK: u8 = 0b00001111;
const PAYLOAD_TYPE_MASK: u8 = 0b01111111;

use crate::Error;

/// RTP header extension.
///
/// If the extension bit is set, the fixed header MUST be followed by
/// exactly one header extension.  The extension consists of a 16-bit
/// profile-defined identifier, a 16-bit length counted in 32-bit words,
/// and that many words of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub profile_id: u16,
    /// Extension payload; the length is always a multiple of 4.
    pub words: Bytes,
}

impl RtpExtension {
    pub fn len(&self) -> usize {
        4 + self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A parsed RTP data packet.
///
/// ### RTP Fixed Header Fields
///
/// ```bash
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |V=2|P|X|  CC   |M|     PT      |       sequence number         |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                           timestamp                           |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |           synchronization source (SSRC) identifier            |
///  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
///  |            contributing source (CSRC) identifiers             |
///  |                             ....                              |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// The interpretation of the marker is defined by a profile.  It is
    /// intended to allow significant events such as frame boundaries to
    /// be marked in the packet stream.
    pub marker: bool,
    /// This field identifies the format of the RTP payload and
    /// determines its interpretation by the application.  A receiver
    /// MUST ignore packets with payload types that it does not
    /// understand.
    pub payload_type: u8,
    /// The sequence number increments by one for each RTP data packet
    /// sent, and may be used by the receiver to detect packet loss and
    /// to restore packet sequence.  The initial value SHOULD be random.
    pub sequence_number: u16,
    /// The timestamp reflects the sampling instant of the first octet
    /// in the RTP data packet, counted in profile-defined clock ticks.
    pub timestamp: u32,
    /// The SSRC field identifies the synchronization source.  This
    /// identifier SHOULD be chosen randomly, with the intent that no
    /// two synchronization sources within the same RTP session will
    /// have the same SSRC identifier.
    pub ssrc: u32,
    /// The CSRC list identifies the contributing sources for the
    /// payload contained in this packet, inserted by mixers.  At most
    /// 15 entries.
    pub csrc: Vec<u32>,
    pub extension: Option<RtpExtension>,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        12 + self.csrc.len() * 4
            + self.extension.as_ref().map(|e| e.len()).unwrap_or(0)
            + self.payload.len()
    }

    /// Parse one RTP datagram.
    ///
    /// Padding octets are validated and stripped; the payload slice
    /// shares the input buffer.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use rtp_session_codec::rtp::RtpPacket;
    ///
    /// let buffer: &[u8] = &[
    ///     0x90, 0x72, 0x04, 0xf1, 0xf8, 0x87, 0x3f, 0xad, 0x67, 0xfe,
    ///     0x9d, 0xfc, 0xbe, 0xde, 0x00, 0x01, 0x22, 0xaa, 0x36, 0x3f,
    ///     0x01, 0x02, 0x03,
    /// ];
    ///
    /// let packet = RtpPacket::decode(Bytes::copy_from_slice(buffer)).unwrap();
    /// assert_eq!(packet.marker, false);
    /// assert_eq!(packet.payload_type, 114);
    /// assert_eq!(packet.sequence_number, 1265);
    /// assert_eq!(packet.timestamp, 4169613229);
    /// assert_eq!(packet.ssrc, 1744739836);
    /// assert_eq!(packet.extension.as_ref().unwrap().profile_id, 0xbede);
    /// assert_eq!(&packet.payload[..], &[0x01, 0x02, 0x03]);
    /// ```
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.len() < 12 {
            return Err(Error::Truncated);
        }

        if (buf[0] & VERSION_MASK) >> 6 != 2 {
            return Err(Error::BadVersion);
        }

        let has_padding = buf[0] & PADDING_MASK != 0;
        let has_extension = buf[0] & EXTENSION_MASK != 0;
        let csrc_count = (buf[0] & CSRC_COUNT_MASK) as usize;
        let marker = buf[1] & MARKER_MASK != 0;
        let payload_type = buf[1] & PAYLOAD_TYPE_MASK;

        // With the marker bit folded in, 72 and 73 are the SR/RR packet
        // types and can never be a data payload.
        if payload_type == 72 || payload_type == 73 {
            return Err(Error::InvalidPayloadType);
        }

        buf.advance(2);
        if buf.len() < 10 + csrc_count * 4 {
            return Err(Error::Truncated);
        }

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        let extension = if has_extension {
            if buf.len() < 4 {
                return Err(Error::BadExtensionLength);
            }

            let profile_id = buf.get_u16();
            let size = buf.get_u16() as usize * 4;
            if buf.len() < size {
                return Err(Error::BadExtensionLength);
            }

            Some(RtpExtension {
                profile_id,
                words: buf.split_to(size),
            })
        } else {
            None
        };

        let payload = if has_padding {
            let count = match buf.last() {
                Some(it) => *it as usize,
                None => return Err(Error::BadPaddingLength),
            };

            if count == 0 || count > buf.len() {
                return Err(Error::BadPaddingLength);
            }

            buf.split_to(buf.len() - count)
        } else {
            buf
        };

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload,
        })
    }

    /// Write the packet into `buf`; no padding is emitted.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::{Bytes, BytesMut};
    /// use rtp_session_codec::rtp::RtpPacket;
    ///
    /// let packet = RtpPacket {
    ///     marker: true,
    ///     payload_type: 96,
    ///     sequence_number: 512,
    ///     timestamp: 90000,
    ///     ssrc: 0xdeadbeef,
    ///     csrc: vec![1, 2],
    ///     extension: None,
    ///     payload: Bytes::from_static(b"data"),
    /// };
    ///
    /// let mut buf = BytesMut::new();
    /// packet.encode(&mut buf);
    ///
    /// let back = RtpPacket::decode(buf.freeze()).unwrap();
    /// assert_eq!(back, packet);
    /// ```
    #[rustfmt::skip]
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut basic = [0u8; 2];
        basic[0] = 2 << 6;
        basic[0] |= if self.extension.is_some() { EXTENSION_MASK } else { 0 };
        basic[0] |= self.csrc.len() as u8 & CSRC_COUNT_MASK;
        basic[1] = if self.marker { MARKER_MASK } else { 0 };
        basic[1] |= self.payload_type & PAYLOAD_TYPE_MASK;

        buf.put(&basic[..]);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for item in &self.csrc {
            buf.put_u32(*item);
        }

        if let Some(extension) = &self.extension {
            buf.put_u16(extension.profile_id);
            buf.put_u16((extension.words.len() / 4) as u16);
            buf.put(extension.words.clone());
        }

        buf.put(self.payload.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_version() {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x40;

        assert_eq!(
            RtpPacket::decode(Bytes::from(buf)),
            Err(Error::BadVersion)
        );
    }

    #[test]
    fn rejects_truncated_csrc_list() {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x83;

        assert_eq!(
            RtpPacket::decode(Bytes::from(buf)),
            Err(Error::Truncated)
        );
    }

    #[test]
    fn rejects_padding_overrun() {
        let mut buf = vec![0u8; 14];
        buf[0] = 0xa0;
        buf[13] = 200;

        assert_eq!(
            RtpPacket::decode(Bytes::from(buf)),
            Err(Error::BadPaddingLength)
        );
    }

    #[test]
    fn rejects_extension_overrun() {
        let mut buf = vec![0u8; 16];
        buf[0] = 0x90;
        buf[15] = 16;

        assert_eq!(
            RtpPacket::decode(Bytes::from(buf)),
            Err(Error::BadExtensionLength)
        );
    }
}
