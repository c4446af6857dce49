use anyhow::Result;
use bytes::{Bytes, BytesMut};
use rtp_session_codec::{
    Error,
    rtcp::{
        App, Compound, Goodbye, ReceiverReport, ReceptionReport, RtcpPacket, Sdes, SdesChunk,
        SdesItem, SdesItemType, SenderReport,
    },
    rtp::{RtpExtension, RtpPacket},
    time::{NtpTime, RtpTime},
};

fn cname_sdes(ssrc: u32) -> RtcpPacket {
    RtcpPacket::SourceDescription(Sdes {
        chunks: vec![SdesChunk {
            ssrc,
            items: vec![SdesItem::new(SdesItemType::Cname, b"panda@localhost")],
        }],
    })
}

#[test]
fn full_compound_round_trips() -> Result<()> {
    let compound = Compound(vec![
        RtcpPacket::SenderReport(SenderReport {
            ssrc: 0x11223344,
            ntp_timestamp: NtpTime::from(RtpTime::new(1_000_000, 250_000)),
            rtp_timestamp: 160_000,
            packet_count: 1000,
            octet_count: 160_000,
            reports: vec![ReceptionReport {
                ssrc: 0x55667788,
                fraction_lost: 12,
                cumulative_lost: 99,
                extended_highest_seq: 0x0001_0002,
                jitter: 7,
                lsr: 0xaabbccdd,
                dlsr: 65536,
            }],
        }),
        cname_sdes(0x11223344),
        RtcpPacket::App(App {
            subtype: 3,
            ssrc: 0x11223344,
            name: *b"test",
            data: Bytes::from_static(&[1, 2, 3, 4]),
        }),
        RtcpPacket::Goodbye(Goodbye {
            sources: vec![0x11223344],
            reason: Bytes::from_static(b"shutting down"),
        }),
    ]);

    let mut buf = BytesMut::new();
    compound.encode(&mut buf)?;
    assert_eq!(buf.len(), compound.len());
    assert_eq!(buf.len() % 4, 0);

    let back = Compound::decode(buf.freeze())?;
    assert_eq!(back, compound);
    Ok(())
}

#[test]
fn compound_must_start_with_a_report() {
    let compound = Compound(vec![cname_sdes(1)]);
    let mut buf = BytesMut::new();
    assert_eq!(compound.encode(&mut buf), Err(Error::BadCompoundStart));
}

#[test]
fn compound_requires_cname_for_reporting_source() {
    let compound = Compound(vec![RtcpPacket::ReceiverReport(ReceiverReport {
        ssrc: 1,
        reports: vec![],
    })]);

    let mut buf = BytesMut::new();
    assert_eq!(compound.encode(&mut buf), Err(Error::MissingCname));
}

#[test]
fn bye_must_come_last() {
    let compound = Compound(vec![
        RtcpPacket::ReceiverReport(ReceiverReport {
            ssrc: 1,
            reports: vec![],
        }),
        RtcpPacket::Goodbye(Goodbye {
            sources: vec![1],
            reason: Bytes::new(),
        }),
        cname_sdes(1),
    ]);

    let mut buf = BytesMut::new();
    assert_eq!(compound.encode(&mut buf), Err(Error::MalformedRtcp));
}

#[test]
fn rtp_with_extension_and_csrc_round_trips() -> Result<()> {
    let packet = RtpPacket {
        marker: true,
        payload_type: 111,
        sequence_number: 0xfffe,
        timestamp: 0xdead_0000,
        ssrc: 42,
        csrc: vec![7, 8, 9],
        extension: Some(RtpExtension {
            profile_id: 0xbede,
            words: Bytes::from_static(&[0x10, 0x20, 0x30, 0x40]),
        }),
        payload: Bytes::from_static(b"opus frame"),
    };

    let mut buf = BytesMut::new();
    packet.encode(&mut buf);
    assert_eq!(buf.len(), packet.len());

    let back = RtpPacket::decode(buf.freeze())?;
    assert_eq!(back, packet);
    Ok(())
}

#[test]
fn padded_rtp_payload_is_stripped() -> Result<()> {
    // version 2 + padding bit, PT 0, seq 1, four payload bytes and
    // four padding bytes (count in the last octet)
    let wire: &[u8] = &[
        0xa0, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2a,
        0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x04,
    ];

    let packet = RtpPacket::decode(Bytes::copy_from_slice(wire))?;
    assert_eq!(&packet.payload[..], &[0xca, 0xfe, 0xba, 0xbe]);
    Ok(())
}
