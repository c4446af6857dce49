use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use rtp_session::{
    Observer, RtpAddress, Session, SessionConfig, TcpParams, TransmitterParams, UdpParams,
    codec::{rtp::RtpPacket, time::RtpTime},
    service::sources::ProbationType,
};
use tokio::net::{TcpListener, TcpStream};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Info);
}

#[derive(Clone, Default)]
struct Recorder {
    byes: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    collisions: Arc<Mutex<Vec<u32>>>,
    receive_errors: Arc<Mutex<Vec<RtpAddress>>>,
}

impl Observer for Recorder {
    fn on_bye(&self, ssrc: u32, reason: &[u8]) {
        self.byes.lock().unwrap().push((ssrc, reason.to_vec()));
    }

    fn on_ssrc_collision(&self, ssrc: u32, _is_rtp: bool) {
        self.collisions.lock().unwrap().push(ssrc);
    }

    fn on_receive_error(&self, addr: &RtpAddress) {
        self.receive_errors.lock().unwrap().push(addr.clone());
    }
}

fn test_config(timestamp_unit: f64) -> SessionConfig {
    let mut config = SessionConfig::new(timestamp_unit);
    // keep the control plane fast enough for a test run
    config.session_bandwidth = 200_000.0;
    config.min_rtcp_interval = 0.4;
    config.probation_type = ProbationType::None;
    config
}

fn udp_params(port: u16) -> TransmitterParams {
    TransmitterParams::Udp(UdpParams {
        bind_ip: LOCALHOST,
        portbase: port,
        ..UdpParams::default()
    })
}

fn udp_addr(port: u16) -> RtpAddress {
    RtpAddress::Udp((LOCALHOST, port).into())
}

async fn settle(sessions: &[&Session], rounds: usize) {
    for _ in 0..rounds {
        for session in sessions {
            session.poll().await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn loopback_echo() {
    init_logger();

    let a = Session::create(test_config(1.0 / 10.0), udp_params(5000), Recorder::default())
        .await
        .unwrap();

    let b = Session::create(test_config(1.0 / 10.0), udp_params(5002), Recorder::default())
        .await
        .unwrap();

    a.add_destination(udp_addr(5002)).unwrap();
    b.add_destination(udp_addr(5000)).unwrap();

    a.set_default_payload_type(0).unwrap();
    a.set_default_mark(false).unwrap();
    a.set_default_timestamp_increment(1).unwrap();

    let first_seq = a.next_sequence_number() as u32;
    for _ in 0..20 {
        a.send_packet(b"1234567890").await.unwrap();
        settle(&[&a, &b], 2).await;
    }

    // wait for the last packets and at least one RTCP exchange
    let a_ssrc = a.local_ssrc();
    let mut cname_seen = false;
    for _ in 0..200 {
        settle(&[&a, &b], 1).await;

        if let Some(info) = b.get_source_info(a_ssrc) {
            let has_cname = info
                .cname
                .as_ref()
                .map(|it| it.contains(&b'@'))
                .unwrap_or(false);

            if info.packets_received == 20 && has_cname {
                cname_seen = true;
                break;
            }
        }
    }

    assert!(cname_seen, "rtcp never delivered a cname");

    let info = b.get_source_info(a_ssrc).unwrap();
    assert_eq!(info.packets_received, 20);
    assert_eq!(info.extended_highest_seq, Some(first_seq + 19));
    assert!(info.is_sender);

    // the payloads came through in order
    b.begin_data_access().unwrap();
    assert!(b.goto_first_source_with_data().unwrap());
    let mut count = 0;
    while let Some(packet) = b.get_next_packet().unwrap() {
        assert_eq!(&packet.payload[..], b"1234567890");
        count += 1;
    }

    b.end_data_access().unwrap();
    assert_eq!(count, 20);

    a.destroy().await;
    b.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ssrc_collision_handoff() {
    init_logger();

    let mut config = test_config(1.0 / 10.0);
    config.predefined_ssrc = Some(0xDEADBEEF);

    let recorder_a = Recorder::default();
    let recorder_b = Recorder::default();

    let a = Session::create(config.clone(), udp_params(5010), recorder_a.clone())
        .await
        .unwrap();

    let b = Session::create(config, udp_params(5012), recorder_b.clone())
        .await
        .unwrap();

    a.add_destination(udp_addr(5012)).unwrap();
    b.add_destination(udp_addr(5010)).unwrap();

    assert_eq!(a.local_ssrc(), 0xDEADBEEF);
    assert_eq!(b.local_ssrc(), 0xDEADBEEF);

    a.send_packet_with(b"x", 0, false, 1).await.unwrap();
    b.send_packet_with(b"x", 0, false, 1).await.unwrap();
    settle(&[&a, &b], 10).await;

    // whoever received second rotated away; both identities are
    // unique now and the collision was reported
    assert_ne!(a.local_ssrc(), b.local_ssrc());
    let collisions =
        recorder_a.collisions.lock().unwrap().len() + recorder_b.collisions.lock().unwrap().len();
    assert!(collisions > 0);

    a.destroy().await;
    b.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_wrap_across_cycle() -> anyhow::Result<()> {
    init_logger();

    let session = Session::create(
        test_config(1.0 / 8000.0),
        TransmitterParams::External(rtp_session::ExternalParams::default()),
        Recorder::default(),
    )
    .await?;

    for seq in [65530u16, 65531, 65532, 0, 1, 2] {
        let packet = RtpPacket {
            marker: false,
            payload_type: 0,
            sequence_number: seq,
            timestamp: seq as u32,
            ssrc: 0x5555,
            csrc: vec![],
            extension: None,
            payload: Bytes::from_static(b"payload"),
        };

        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        session.inject_data(
            &buf,
            Some(RtpAddress::Raw(Bytes::from_static(b"peer"))),
            false,
        )?;
    }

    session.poll().await?;

    let info = session.get_source_info(0x5555).unwrap();
    // one wrap, highest sequence number 2
    assert_eq!(info.extended_highest_seq, Some(65538));
    assert_eq!(info.extended_highest_seq.unwrap() >> 16, 1);
    assert_eq!(info.extended_highest_seq.unwrap() & 0xffff, 2);

    session.destroy().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bye_destroy_deadline() {
    init_logger();

    let recorder_b = Recorder::default();

    let a = Session::create(test_config(1.0 / 10.0), udp_params(5020), Recorder::default())
        .await
        .unwrap();

    let b = Session::create(test_config(1.0 / 10.0), udp_params(5022), recorder_b.clone())
        .await
        .unwrap();

    a.add_destination(udp_addr(5022)).unwrap();
    b.add_destination(udp_addr(5020)).unwrap();

    a.send_packet_with(b"x", 0, false, 1).await.unwrap();
    settle(&[&a, &b], 5).await;

    let a_ssrc = a.local_ssrc();
    a.bye_destroy(RtpTime::from_secs(10), b"bye").await.unwrap();

    // the session is gone for everything but inspection
    assert!(!a.is_active());
    assert!(matches!(
        a.send_packet_with(b"x", 0, false, 1).await,
        Err(rtp_session::Error::InvalidState(_))
    ));

    let mut saw_bye = false;
    for _ in 0..100 {
        b.poll().await.unwrap();
        if let Some(info) = b.get_source_info(a_ssrc) {
            if info.received_bye {
                assert_eq!(info.bye_reason.as_deref(), Some(&b"bye"[..]));
                saw_bye = true;
                break;
            }
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(saw_bye, "peer never saw the goodbye");
    assert!(!recorder_b.byes.lock().unwrap().is_empty());
    b.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_framing_round_trip() {
    init_logger();

    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    let connect = tokio::spawn(async move { TcpStream::connect(server_addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    let connected = connect.await.unwrap();

    let recorder_a = Recorder::default();
    let a = Session::create(
        test_config(1.0 / 90000.0),
        TransmitterParams::Tcp(TcpParams::default()),
        recorder_a.clone(),
    )
    .await
    .unwrap();

    let b = Session::create(
        test_config(1.0 / 90000.0),
        TransmitterParams::Tcp(TcpParams::default()),
        Recorder::default(),
    )
    .await
    .unwrap();

    a.add_tcp_destination(connected).await.unwrap();
    b.add_tcp_destination(accepted).await.unwrap();

    let big = vec![0x42u8; 45_678];
    let a_ssrc = a.local_ssrc();

    for round in 0..20usize {
        let payload: &[u8] = if round % 2 == 0 { &big } else { &[] };
        a.send_packet_with(payload, 96, false, 3000).await.unwrap();

        let mut received = None;
        for _ in 0..200 {
            b.poll().await.unwrap();
            b.begin_data_access().unwrap();
            if b.goto_first_source_with_data().unwrap() {
                received = b.get_next_packet().unwrap();
            }

            b.end_data_access().unwrap();
            if received.is_some() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let packet = received.expect("framed packet never arrived");
        assert_eq!(packet.ssrc, a_ssrc);
        assert_eq!(&packet.payload[..], payload);
    }

    // closing one endpoint mid-run surfaces a receive error on the
    // peer and drops the destination
    b.destroy().await;

    let mut saw_error = false;
    for _ in 0..100 {
        a.send_packet_with(b"x", 96, false, 3000).await.unwrap();
        a.poll().await.unwrap();
        if !recorder_a.receive_errors.lock().unwrap().is_empty() {
            saw_error = true;
            break;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(saw_error, "peer close never surfaced an error");
    a.destroy().await;
}
