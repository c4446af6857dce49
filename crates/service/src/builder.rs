use bytes::{Bytes, BytesMut};
use codec::{
    rtp::{RtpExtension, RtpPacket},
    time::RtpTime,
};

use crate::{Error, random::RtpRandom};

/// Builder for outgoing RTP packets.
///
/// Owns the session's sending identity: the SSRC, the running sequence
/// number and timestamp, and the payload type / marker / timestamp
/// increment defaults used by the short form of `send_packet`.  The
/// sequence number and the timestamp offset start at random values, as
/// RFC 3550 recommends.
pub struct RtpBuilder {
    max_packet_size: usize,
    ssrc: u32,
    sequence_number: u16,
    timestamp: u32,
    default_payload_type: Option<u8>,
    default_mark: Option<bool>,
    default_increment: Option<u32>,
    packet_count: u32,
    octet_count: u32,
    last_send_time: Option<RtpTime>,
}

impl RtpBuilder {
    pub fn new(max_packet_size: usize, predefined_ssrc: Option<u32>, rng: &mut RtpRandom) -> Self {
        Self {
            max_packet_size,
            ssrc: predefined_ssrc.unwrap_or_else(|| rng.random_u32()),
            sequence_number: rng.random_u16(),
            timestamp: rng.random_u32(),
            default_payload_type: None,
            default_mark: None,
            default_increment: None,
            packet_count: 0,
            octet_count: 0,
            last_send_time: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// The sequence number the next packet will carry.
    pub fn next_sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn octet_count(&self) -> u32 {
        self.octet_count
    }

    pub fn last_send_time(&self) -> Option<RtpTime> {
        self.last_send_time
    }

    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    pub fn set_default_payload_type(&mut self, payload_type: u8) -> Result<(), Error> {
        if payload_type > 127 {
            return Err(Error::InvalidPayloadType);
        }

        self.default_payload_type = Some(payload_type);
        Ok(())
    }

    pub fn set_default_mark(&mut self, mark: bool) {
        self.default_mark = Some(mark);
    }

    pub fn set_default_increment(&mut self, increment: u32) {
        self.default_increment = Some(increment);
    }

    pub fn increment_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }

    pub fn increment_timestamp_default(&mut self) -> Result<(), Error> {
        let increment = self.default_increment.ok_or(Error::DefaultNotSet)?;
        self.timestamp = self.timestamp.wrapping_add(increment);
        Ok(())
    }

    /// Build a packet using the configured defaults.
    pub fn build_default(&mut self, payload: &[u8], now: RtpTime) -> Result<Bytes, Error> {
        let payload_type = self.default_payload_type.ok_or(Error::DefaultNotSet)?;
        let mark = self.default_mark.ok_or(Error::DefaultNotSet)?;
        let increment = self.default_increment.ok_or(Error::DefaultNotSet)?;
        self.build(payload, payload_type, mark, increment, None, now)
    }

    /// Build a packet, advancing the sequence number and adding the
    /// timestamp increment to the running timestamp.
    ///
    /// # Test
    ///
    /// ```
    /// use codec::rtp::RtpPacket;
    /// use codec::time::RtpTime;
    /// use rtp_session_service::builder::RtpBuilder;
    /// use rtp_session_service::random::RtpRandom;
    ///
    /// let mut rng = RtpRandom::from_seed(1);
    /// let mut builder = RtpBuilder::new(1400, Some(0x11223344), &mut rng);
    ///
    /// let first = builder.next_sequence_number();
    /// let bytes = builder
    ///     .build(b"data", 96, true, 160, None, RtpTime::now())
    ///     .unwrap();
    ///
    /// let packet = RtpPacket::decode(bytes).unwrap();
    /// assert_eq!(packet.ssrc, 0x11223344);
    /// assert_eq!(packet.sequence_number, first);
    /// assert_eq!(builder.next_sequence_number(), first.wrapping_add(1));
    /// assert_eq!(builder.packet_count(), 1);
    /// ```
    pub fn build(
        &mut self,
        payload: &[u8],
        payload_type: u8,
        mark: bool,
        timestamp_increment: u32,
        extension: Option<(u16, &[u32])>,
        now: RtpTime,
    ) -> Result<Bytes, Error> {
        if payload_type > 127 {
            return Err(Error::InvalidPayloadType);
        }

        let packet = RtpPacket {
            marker: mark,
            payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            csrc: Vec::new(),
            extension: extension.map(|(profile_id, words)| {
                let mut data = BytesMut::with_capacity(words.len() * 4);
                for word in words {
                    data.extend_from_slice(&word.to_be_bytes());
                }

                RtpExtension {
                    profile_id,
                    words: data.freeze(),
                }
            }),
            payload: Bytes::copy_from_slice(payload),
        };

        if packet.len() > self.max_packet_size {
            return Err(Error::PacketTooLarge);
        }

        let mut buf = BytesMut::with_capacity(packet.len());
        packet.encode(&mut buf);

        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(timestamp_increment);
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(payload.len() as u32);
        self.last_send_time = Some(now);
        Ok(buf.freeze())
    }

    /// Adopt a new SSRC after a collision: counters reset and the
    /// sequence number is re-randomized, as if a new stream started.
    pub fn rotate_ssrc(&mut self, ssrc: u32, rng: &mut RtpRandom) {
        self.ssrc = ssrc;
        self.sequence_number = rng.random_u16();
        self.timestamp = rng.random_u32();
        self.packet_count = 0;
        self.octet_count = 0;
        self.last_send_time = None;
    }
}
