use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;

use super::{PacketType, put_header};
use crate::Error;

/// SDES item types registered by RFC 3550.
///
/// The CNAME identifier is mandatory in every SDES packet; the other
/// items are sent at a much lower rate, if at all.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum SdesItemType {
    /// Canonical end-point identifier.  The CNAME item SHOULD have the
    /// format "user@host" and MUST be unique among all participants
    /// within one RTP session, staying constant across SSRC changes.
    Cname = 1,
    Name = 2,
    Email = 3,
    Phone = 4,
    Location = 5,
    Tool = 6,
    Note = 7,
    Priv = 8,
}

/// One (type, length, value) item.  The value is at most 255 octets
/// and is not null terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: SdesItemType,
    pub value: Bytes,
}

impl SdesItem {
    pub fn new(kind: SdesItemType, value: &[u8]) -> Self {
        Self {
            kind,
            value: Bytes::copy_from_slice(value),
        }
    }
}

/// One chunk: an SSRC/CSRC followed by its items, padded to the next
/// 32-bit boundary with at least one terminating zero octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    fn len(&self) -> usize {
        let size = 4 + self
            .items
            .iter()
            .map(|item| 2 + item.value.len())
            .sum::<usize>();

        // terminator plus alignment
        (size + 4) & !3
    }
}

/// Source description packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sdes {
    pub chunks: Vec<SdesChunk>,
}

impl Sdes {
    pub fn len(&self) -> usize {
        4 + self.chunks.iter().map(|chunk| chunk.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// # Test
    ///
    /// ```
    /// use bytes::{Bytes, BytesMut};
    /// use rtp_session_codec::rtcp::{Sdes, SdesChunk, SdesItem, SdesItemType};
    ///
    /// let sdes = Sdes {
    ///     chunks: vec![SdesChunk {
    ///         ssrc: 0x11223344,
    ///         items: vec![
    ///             SdesItem::new(SdesItemType::Cname, b"user@host"),
    ///             SdesItem::new(SdesItemType::Tool, b"rtp-session"),
    ///         ],
    ///     }],
    /// };
    ///
    /// assert_eq!(sdes.len() % 4, 0);
    /// ```
    pub(super) fn decode(count: u8, mut body: Bytes) -> Result<Self, Error> {
        let mut chunks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if body.len() < 4 {
                return Err(Error::MalformedRtcp);
            }

            let ssrc = body.get_u32();
            let mut consumed = 0;
            let mut items = Vec::with_capacity(2);

            loop {
                if body.is_empty() {
                    return Err(Error::MalformedRtcp);
                }

                let kind = body.get_u8();
                consumed += 1;
                if kind == 0 {
                    break;
                }

                if body.is_empty() {
                    return Err(Error::MalformedRtcp);
                }

                let size = body.get_u8() as usize;
                consumed += 1 + size;
                if body.len() < size {
                    return Err(Error::MalformedRtcp);
                }

                let value = body.split_to(size);
                // items of unknown type are skipped, not fatal
                if let Ok(kind) = SdesItemType::try_from(kind) {
                    items.push(SdesItem { kind, value });
                }
            }

            // eat the alignment padding after the terminator
            let align = (4 - consumed % 4) % 4;
            if body.len() < align {
                return Err(Error::MalformedRtcp);
            }

            body.advance(align);
            chunks.push(SdesChunk { ssrc, items });
        }

        Ok(Self { chunks })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.chunks.len() > 31 {
            return Err(Error::TooManySources);
        }

        put_header(
            buf,
            PacketType::SourceDescription as u8,
            self.chunks.len() as u8,
            self.len(),
        );

        for chunk in &self.chunks {
            buf.put_u32(chunk.ssrc);

            let mut size = 0;
            for item in &chunk.items {
                if item.value.len() > 255 {
                    return Err(Error::SdesItemTooLong);
                }

                buf.put_u8(item.kind as u8);
                buf.put_u8(item.value.len() as u8);
                buf.put(item.value.clone());
                size += 2 + item.value.len();
            }

            for _ in 0..4 - size % 4 {
                buf.put_u8(0);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_padding_round_trips() {
        for value in [&b"a"[..], b"ab", b"abc", b"abcd"] {
            let sdes = Sdes {
                chunks: vec![SdesChunk {
                    ssrc: 1,
                    items: vec![SdesItem::new(SdesItemType::Cname, value)],
                }],
            };

            let mut buf = BytesMut::new();
            sdes.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), sdes.len());

            let body = buf.freeze().slice(4..);
            let back = Sdes::decode(1, body).unwrap();
            assert_eq!(back, sdes);
        }
    }

    #[test]
    fn oversized_item_is_rejected() {
        let sdes = Sdes {
            chunks: vec![SdesChunk {
                ssrc: 1,
                items: vec![SdesItem::new(SdesItemType::Note, &[b'x'; 300])],
            }],
        };

        let mut buf = BytesMut::new();
        assert_eq!(sdes.encode(&mut buf), Err(Error::SdesItemTooLong));
    }
}
