use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, put_header};
use crate::Error;

/// Goodbye packet, indicating that one or more sources are no longer
/// active.  An optional reason phrase follows the SSRC list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    /// Reason for leaving; empty means no reason was given.  Truncated
    /// to 255 octets on the wire.
    pub reason: Bytes,
}

impl Goodbye {
    pub fn len(&self) -> usize {
        let mut size = 4 + self.sources.len() * 4;
        if !self.reason.is_empty() {
            size += (1 + self.reason.len() + 3) & !3;
        }

        size
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub(super) fn decode(count: u8, mut body: Bytes) -> Result<Self, Error> {
        if body.len() < count as usize * 4 {
            return Err(Error::MalformedRtcp);
        }

        let sources = (0..count).map(|_| body.get_u32()).collect();
        let reason = if !body.is_empty() {
            let size = body.get_u8() as usize;
            if body.len() < size {
                return Err(Error::MalformedRtcp);
            }

            body.split_to(size)
        } else {
            Bytes::new()
        };

        Ok(Self { sources, reason })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.sources.len() > 31 {
            return Err(Error::TooManySources);
        }

        if self.reason.len() > 255 {
            return Err(Error::ReasonTooLong);
        }

        put_header(
            buf,
            PacketType::Goodbye as u8,
            self.sources.len() as u8,
            self.len(),
        );

        for ssrc in &self.sources {
            buf.put_u32(*ssrc);
        }

        if !self.reason.is_empty() {
            buf.put_u8(self.reason.len() as u8);
            buf.put(self.reason.clone());
            for _ in 0..(4 - (1 + self.reason.len()) % 4) % 4 {
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
    fn reason_round_trips() {
        let bye = Goodbye {
            sources: vec![0xdeadbeef],
            reason: Bytes::from_static(b"bye"),
        };

        let mut buf = BytesMut::new();
        bye.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), bye.len());

        let back = Goodbye::decode(1, buf.freeze().slice(4..)).unwrap();
        assert_eq!(back, bye);
    }
}
