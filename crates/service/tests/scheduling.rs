use anyhow::Result;
use bytes::{Bytes, BytesMut};
use codec::{
    rtcp::{Compound, RtcpPacket},
    rtp::RtpPacket,
    time::RtpTime,
};
use rtp_session_service::{
    GroupState,
    builder::RtpBuilder,
    random::RtpRandom,
    rtcp::{RtcpBuilder, RtcpBuilderOptions, SdesIntervals},
    scheduler::{RtcpScheduler, SchedulerOptions},
    sources::{SourceHandler, Sources, SourcesOptions},
};

struct Inert;

impl SourceHandler for Inert {}

fn sources(own_ssrc: u32) -> Sources<u32, Inert> {
    Sources::new(
        SourcesOptions {
            timestamp_unit: 1.0 / 8000.0,
            ..SourcesOptions::default()
        },
        own_ssrc,
        Inert,
    )
}

/// A mass timeout at t=10 shrinking the group from 100 to 25 members
/// pulls a timer armed for t=30 in to t=15.
#[test]
fn reverse_reconsideration_rescales_the_timer() {
    let mut scheduler = RtcpScheduler::new(SchedulerOptions::default());
    scheduler.restore(RtpTime::new(0, 0), RtpTime::new(30, 0), 100);

    scheduler.reconsider_members(RtpTime::new(10, 0), 25);

    assert_eq!(scheduler.next_transmission(), RtpTime::new(15, 0));
    assert_eq!(scheduler.pmembers(), 25);
}

/// One participant's compound, parsed on the wire level and fed to a
/// second participant's table, produces the report/SDES state the
/// first one described.
#[test]
fn compound_travels_between_tables() -> Result<()> {
    let mut rng = RtpRandom::from_seed(21);
    let now = RtpTime::new(100, 0);

    // participant A heard 8000 ticks of media from ssrc 0x22
    let mut a_sources = sources(0x11);
    for seq in 0..5u16 {
        a_sources.process_rtp(
            RtpPacket {
                marker: false,
                payload_type: 0,
                sequence_number: seq,
                timestamp: seq as u32 * 160,
                ssrc: 0x22,
                csrc: vec![],
                extension: None,
                payload: Bytes::from_static(b"0123456789"),
            },
            now,
            Some(&1),
            false,
        );
    }

    let a_rtp = RtpBuilder::new(1400, Some(0x11), &mut rng);
    let mut a_rtcp = RtcpBuilder::new(RtcpBuilderOptions {
        max_packet_size: 1400,
        timestamp_unit: 1.0 / 8000.0,
        pre_transmission_delay: 0.0,
        cname: Bytes::from_static(b"a@example"),
        intervals: SdesIntervals::default(),
    });

    let compound = a_rtcp.build_next(&mut a_sources, &a_rtp, false, now)?;
    let mut wire = BytesMut::new();
    compound.encode(&mut wire)?;

    // participant B applies it
    let parsed = Compound::decode(wire.freeze())?;
    let mut b_sources = sources(0x33);
    b_sources.process_rtcp_compound(&parsed, now, Some(&2), false);

    let a_entry = b_sources.get(0x11).expect("sender not learned");
    assert_eq!(a_entry.cname().map(|it| &it[..]), Some(&b"a@example"[..]));
    assert!(b_sources.member_count() >= 2);

    // the report block about 0x22 survived the trip
    match &parsed.0[0] {
        RtcpPacket::ReceiverReport(rr) => {
            assert_eq!(rr.ssrc, 0x11);
            assert_eq!(rr.reports.len(), 1);
            assert_eq!(rr.reports[0].ssrc, 0x22);
            assert_eq!(rr.reports[0].extended_highest_seq, 4);
        }
        other => panic!("expected a receiver report, got {:?}", other),
    }

    Ok(())
}

/// The scheduler's own-traffic split: a session where we are one of
/// few senders reports on the sender budget, and the average size
/// estimate follows what actually crosses the wire.
#[test]
fn average_size_tracks_observed_compounds() {
    let mut rng = RtpRandom::from_seed(22);
    let mut scheduler = RtcpScheduler::new(SchedulerOptions {
        use_half_at_startup: false,
        ..SchedulerOptions::default()
    });

    let group = GroupState {
        members: 4,
        senders: 0,
        we_sent: false,
    };

    // arm the timer, then observe a run of small compounds
    assert!(!scheduler.is_time(RtpTime::new(0, 0), &group, &mut rng));
    let before = scheduler.deterministic_interval(&group);
    for _ in 0..64 {
        scheduler.analyse(64);
    }

    // the estimate decays towards 64 + overhead, shortening Td
    let after = scheduler.deterministic_interval(&group);
    assert!(after < before);
}
