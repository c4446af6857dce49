use bytes::{Bytes, BytesMut};
use criterion::{Criterion, criterion_group, criterion_main};
use rtp_session_codec::{
    rtcp::{Compound, ReceiverReport, RtcpPacket, Sdes, SdesChunk, SdesItem, SdesItemType},
    rtp::RtpPacket,
};

fn criterion_benchmark(c: &mut Criterion) {
    let mut buf = BytesMut::with_capacity(1500);
    let packet = RtpPacket {
        marker: false,
        payload_type: 96,
        sequence_number: 1265,
        timestamp: 4169613229,
        ssrc: 1744739836,
        csrc: vec![],
        extension: None,
        payload: Bytes::from_static(&[0u8; 960]),
    };

    packet.encode(&mut buf);
    let wire = buf.clone().freeze();

    c.bench_function("decode_rtp", |b| {
        b.iter(|| {
            RtpPacket::decode(wire.clone()).unwrap();
        })
    });

    c.bench_function("encode_rtp", |b| {
        b.iter(|| {
            buf.clear();
            packet.encode(&mut buf);
        })
    });

    let compound = Compound(vec![
        RtcpPacket::ReceiverReport(ReceiverReport {
            ssrc: 1744739836,
            reports: vec![],
        }),
        RtcpPacket::SourceDescription(Sdes {
            chunks: vec![SdesChunk {
                ssrc: 1744739836,
                items: vec![SdesItem::new(SdesItemType::Cname, b"user@host")],
            }],
        }),
    ]);

    let mut rtcp_buf = BytesMut::with_capacity(128);
    compound.encode(&mut rtcp_buf).unwrap();
    let rtcp_wire = rtcp_buf.freeze();

    c.bench_function("decode_rtcp_compound", |b| {
        b.iter(|| {
            Compound::decode(rtcp_wire.clone()).unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
