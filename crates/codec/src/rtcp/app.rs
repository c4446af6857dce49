use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, put_header};
use crate::Error;

/// Application-defined packet, intended for experimental use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// Subtype, allowing a set of APP packets to be defined under one
    /// unique name.
    pub subtype: u8,
    pub ssrc: u32,
    /// Four ASCII characters chosen by the defining application.
    pub name: [u8; 4],
    /// Application-dependent data; the length MUST be a multiple of 4.
    pub data: Bytes,
}

impl App {
    pub fn len(&self) -> usize {
        12 + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(super) fn decode(subtype: u8, mut body: Bytes) -> Result<Self, Error> {
        if body.len() < 8 {
            return Err(Error::MalformedRtcp);
        }

        let ssrc = body.get_u32();
        let mut name = [0u8; 4];
        body.copy_to_slice(&mut name);

        Ok(Self {
            subtype,
            ssrc,
            name,
            data: body,
        })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.data.len() % 4 != 0 {
            return Err(Error::BadAppData);
        }

        put_header(buf, PacketType::App as u8, self.subtype, self.len());
        buf.put_u32(self.ssrc);
        buf.put(&self.name[..]);
        buf.put(self.data.clone());
        Ok(())
    }
}
