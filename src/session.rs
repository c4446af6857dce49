use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use codec::{
    rtcp::{Compound, SdesItemType},
    rtp::RtpPacket,
    time::RtpTime,
};
use parking_lot::Mutex;
use service::{
    GroupState,
    builder::RtpBuilder,
    random::RtpRandom,
    rtcp::{RtcpBuilder, RtcpBuilderOptions, SdesIntervals},
    scheduler::{RtcpScheduler, SchedulerOptions},
    sources::{SenderInfo, SourceHandler, Sources, SourcesOptions, TimeoutIntervals},
};
use tokio::task::JoinHandle;

use crate::{
    config::SessionConfig,
    error::{Error, IoEventKind},
    observer::Observer,
    transport::{
        ExternalTransmitter, RawPacket, ReceiveMode, RtpAddress, TcpTransmitter, Transmitter,
        TransmitterParams, UdpTransmitter,
    },
};

/// Snapshot of one source's state, safe to hand out without holding
/// any session lock.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub ssrc: u32,
    pub is_own: bool,
    pub is_sender: bool,
    pub on_probation: bool,
    pub packets_received: u32,
    pub extended_highest_seq: Option<u32>,
    pub jitter: u32,
    pub cname: Option<Bytes>,
    pub sdes_items: Vec<(SdesItemType, Bytes)>,
    pub received_bye: bool,
    pub bye_reason: Option<Bytes>,
    pub sender_info: Option<SenderInfo>,
    pub round_trip: Option<RtpTime>,
}

/// Forwards source table notifications onto the application observer.
struct HandlerAdapter(Arc<dyn Observer>);

impl SourceHandler for HandlerAdapter {
    fn on_validated_rtp_packet(&self, ssrc: u32, packet: &RtpPacket, on_probation: bool) -> bool {
        self.0.on_validated_rtp_packet(ssrc, packet, on_probation)
    }

    fn on_rtcp_compound_packet(&self, compound: &Compound, receive_time: RtpTime) {
        self.0.on_rtcp_compound_packet(compound, receive_time);
    }

    fn on_rtcp_sdes_item(&self, ssrc: u32, kind: SdesItemType, value: &[u8]) {
        self.0.on_rtcp_sdes_item(ssrc, kind, value);
    }

    fn on_new_source(&self, ssrc: u32) {
        self.0.on_new_source(ssrc);
    }

    fn on_remove_source(&self, ssrc: u32) {
        self.0.on_remove_source(ssrc);
    }

    fn on_timeout(&self, ssrc: u32) {
        self.0.on_timeout(ssrc);
    }

    fn on_bye(&self, ssrc: u32, reason: &[u8]) {
        self.0.on_bye(ssrc, reason);
    }

    fn on_ssrc_collision(&self, ssrc: u32, is_rtp: bool) {
        self.0.on_ssrc_collision(ssrc, is_rtp);
    }

    fn on_cname_collision(&self, ssrc: u32, cname: &[u8]) {
        self.0.on_cname_collision(ssrc, cname);
    }
}

/// The two outgoing-packet builders share one lock, they change
/// together on SSRC rotation.
struct Builders {
    rtp: RtpBuilder,
    rtcp: RtcpBuilder,
}

/// Iteration state of the data access bracket.
#[derive(Default)]
struct Cursor {
    current: Option<u32>,
}

struct Inner {
    config: SessionConfig,
    observer: Arc<dyn Observer>,
    transmitter: Transmitter,
    sources: Mutex<Sources<RtpAddress, HandlerAdapter>>,
    scheduler: Mutex<RtcpScheduler>,
    builders: Mutex<Builders>,
    byes: Mutex<VecDeque<Compound>>,
    rng: Mutex<RtpRandom>,
    /// We transmitted at least one packet (data or control) under the
    /// current SSRC; gates whether a collision or shutdown owes a BYE.
    sent_packets: AtomicBool,
    destroyed: AtomicBool,
    in_data_access: AtomicBool,
    cursor: Mutex<Cursor>,
    internal_poll: AtomicBool,
    stop: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// An RTP session: the data plane, the control plane, and the
/// participant bookkeeping of RFC 3550 behind one handle.
///
/// The handle is cheaply cloneable; all methods take `&self`.  Drive
/// the session either by calling [`Session::poll`] (after
/// [`Session::wait_for_incoming_data`]) or by enabling the internal
/// poll task in the configuration.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub async fn create<T>(
        config: SessionConfig,
        params: TransmitterParams,
        observer: T,
    ) -> Result<Self, Error>
    where
        T: Observer + 'static,
    {
        config.validate()?;

        let observer: Arc<dyn Observer> = Arc::new(observer);
        let mut rng = RtpRandom::new();

        let transmitter = match params {
            TransmitterParams::Udp(it) => {
                Transmitter::Udp(UdpTransmitter::create(it, config.max_packet_size).await?)
            }
            TransmitterParams::Tcp(it) => Transmitter::Tcp(TcpTransmitter::create(it)),
            TransmitterParams::External(it) => {
                Transmitter::External(ExternalTransmitter::create(it))
            }
        };

        transmitter.set_receive_mode(config.receive_mode);

        let rtp = RtpBuilder::new(config.max_packet_size, config.predefined_ssrc, &mut rng);
        let sources = Sources::new(
            SourcesOptions {
                probation_type: config.probation_type,
                min_sequential: service::sources::stats::MIN_SEQUENTIAL,
                timestamp_unit: config.timestamp_unit,
                accept_own_packets: config.accept_own_packets,
            },
            rtp.ssrc(),
            HandlerAdapter(observer.clone()),
        );

        let scheduler = RtcpScheduler::new(SchedulerOptions {
            session_bandwidth: config.session_bandwidth,
            rtcp_fraction: config.rtcp_fraction,
            sender_fraction: config.sender_fraction,
            min_interval: config.min_rtcp_interval,
            use_half_at_startup: config.use_half_at_startup,
            header_overhead: transmitter.header_overhead(),
        });

        let rtcp = RtcpBuilder::new(RtcpBuilderOptions {
            max_packet_size: config.max_packet_size,
            timestamp_unit: config.timestamp_unit,
            pre_transmission_delay: config.pre_transmission_delay,
            cname: Bytes::from(config.resolved_cname()),
            intervals: SdesIntervals {
                name: config.sdes_intervals.name,
                email: config.sdes_intervals.email,
                phone: config.sdes_intervals.phone,
                location: config.sdes_intervals.location,
                tool: config.sdes_intervals.tool,
                note: config.sdes_intervals.note,
            },
        });

        let session = Self {
            inner: Arc::new(Inner {
                config,
                observer,
                transmitter,
                sources: Mutex::new(sources),
                scheduler: Mutex::new(scheduler),
                builders: Mutex::new(Builders { rtp, rtcp }),
                byes: Mutex::new(VecDeque::new()),
                rng: Mutex::new(rng),
                sent_packets: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                in_data_access: AtomicBool::new(false),
                cursor: Mutex::new(Cursor::default()),
                internal_poll: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                poll_task: Mutex::new(None),
            }),
        };

        if session.inner.config.use_internal_poll_thread {
            session.spawn_poll_task();
        }

        Ok(session)
    }

    fn ensure_alive(&self) -> Result<(), Error> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("session is destroyed"));
        }

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn local_ssrc(&self) -> u32 {
        self.inner.sources.lock().own_ssrc()
    }

    /// The sequence number the next outgoing packet will carry.
    pub fn next_sequence_number(&self) -> u16 {
        self.inner.builders.lock().rtp.next_sequence_number()
    }

    /// The local (rtp, rtcp) port pair, when the transport has one.
    pub fn local_ports(&self) -> Option<(u16, u16)> {
        self.inner.transmitter.local_ports()
    }

    // ---- sending -------------------------------------------------

    /// Send a payload using the configured payload type, marker and
    /// timestamp increment defaults.
    pub async fn send_packet(&self, data: &[u8]) -> Result<(), Error> {
        self.ensure_alive()?;
        let now = RtpTime::now();
        let bytes = self.inner.builders.lock().rtp.build_default(data, now)?;
        self.send_rtp_bytes(bytes, now).await
    }

    pub async fn send_packet_with(
        &self,
        data: &[u8],
        payload_type: u8,
        mark: bool,
        timestamp_increment: u32,
    ) -> Result<(), Error> {
        self.ensure_alive()?;
        let now = RtpTime::now();
        let bytes = self.inner.builders.lock().rtp.build(
            data,
            payload_type,
            mark,
            timestamp_increment,
            None,
            now,
        )?;

        self.send_rtp_bytes(bytes, now).await
    }

    /// Send with an RTP header extension.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_packet_ex(
        &self,
        data: &[u8],
        payload_type: u8,
        mark: bool,
        timestamp_increment: u32,
        extension_id: u16,
        extension_words: &[u32],
    ) -> Result<(), Error> {
        self.ensure_alive()?;
        let now = RtpTime::now();
        let bytes = self.inner.builders.lock().rtp.build(
            data,
            payload_type,
            mark,
            timestamp_increment,
            Some((extension_id, extension_words)),
            now,
        )?;

        self.send_rtp_bytes(bytes, now).await
    }

    async fn send_rtp_bytes(&self, bytes: Bytes, now: RtpTime) -> Result<(), Error> {
        let bytes = self.inner.observer.on_change_rtp_or_rtcp_data(bytes, true);
        self.inner.transmitter.send_rtp(&bytes).await?;
        self.inner.observer.on_sent_rtp_or_rtcp_data(&bytes, true);
        self.inner.sent_packets.store(true, Ordering::SeqCst);
        self.inner.sources.lock().mark_own_sender(now);
        Ok(())
    }

    /// Push bytes through the transport untouched, without building an
    /// RTP header.
    pub async fn send_raw_data(&self, data: &[u8], as_rtp: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        if as_rtp {
            self.inner.transmitter.send_rtp(data).await
        } else {
            self.inner.transmitter.send_rtcp(data).await
        }
    }

    /// Queue an application-defined RTCP packet onto the next
    /// compound.
    pub fn send_rtcp_app_packet(
        &self,
        subtype: u8,
        name: [u8; 4],
        data: &[u8],
    ) -> Result<(), Error> {
        self.ensure_alive()?;
        let ssrc = self.local_ssrc();
        self.inner
            .builders
            .lock()
            .rtcp
            .queue_app(subtype, name, ssrc, data)
            .map_err(Error::from)
    }

    pub fn set_default_payload_type(&self, payload_type: u8) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .builders
            .lock()
            .rtp
            .set_default_payload_type(payload_type)
            .map_err(Error::from)
    }

    pub fn set_default_mark(&self, mark: bool) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.builders.lock().rtp.set_default_mark(mark);
        Ok(())
    }

    pub fn set_default_timestamp_increment(&self, increment: u32) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.builders.lock().rtp.set_default_increment(increment);
        Ok(())
    }

    /// Advance the outgoing timestamp without sending, e.g. across a
    /// silence period.
    pub fn increment_timestamp(&self, increment: u32) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.builders.lock().rtp.increment_timestamp(increment);
        Ok(())
    }

    pub fn increment_timestamp_default(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .builders
            .lock()
            .rtp
            .increment_timestamp_default()
            .map_err(Error::from)
    }

    // ---- configuration at runtime --------------------------------

    pub fn set_session_bandwidth(&self, bandwidth: f64) -> Result<(), Error> {
        self.ensure_alive()?;
        if bandwidth <= 0.0 {
            return Err(Error::InvalidConfig("session bandwidth must be positive"));
        }

        self.inner.scheduler.lock().options_mut().session_bandwidth = bandwidth;
        Ok(())
    }

    pub fn set_maximum_packet_size(&self, size: usize) -> Result<(), Error> {
        self.ensure_alive()?;
        if size < 64 {
            return Err(Error::InvalidConfig("maximum packet size below 64"));
        }

        let mut builders = self.inner.builders.lock();
        builders.rtp.set_max_packet_size(size);
        builders.rtcp.options_mut().max_packet_size = size;
        Ok(())
    }

    /// Change the RTP clock resolution, e.g. after a payload change.
    pub fn set_timestamp_unit(&self, unit: f64) -> Result<(), Error> {
        self.ensure_alive()?;
        if unit <= 0.0 {
            return Err(Error::InvalidConfig("timestamp unit must be positive"));
        }

        self.inner.sources.lock().set_timestamp_unit(unit);
        self.inner.builders.lock().rtcp.options_mut().timestamp_unit = unit;
        Ok(())
    }

    pub fn set_pre_transmission_delay(&self, delay: f64) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .builders
            .lock()
            .rtcp
            .options_mut()
            .pre_transmission_delay = delay;

        Ok(())
    }

    /// Set one of our SDES items (name, email, ...).
    pub fn set_local_sdes_item(&self, kind: SdesItemType, value: &[u8]) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .builders
            .lock()
            .rtcp
            .set_local_item(kind, value)
            .map_err(Error::from)
    }

    /// Emit the given SDES item once every `interval` compound
    /// packets; zero disables it again.
    pub fn set_sdes_item_interval(&self, kind: SdesItemType, interval: u32) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.builders.lock().rtcp.set_interval(kind, interval);
        Ok(())
    }

    // ---- transport surface ---------------------------------------

    pub fn add_destination(&self, addr: RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.add_destination(addr)
    }

    /// Register an established, framed TCP connection as a
    /// destination.
    pub async fn add_tcp_destination(
        &self,
        stream: tokio::net::TcpStream,
    ) -> Result<RtpAddress, Error> {
        self.ensure_alive()?;
        match &self.inner.transmitter {
            Transmitter::Tcp(it) => it.add_client(stream).await,
            _ => Err(Error::Unsupported("not a stream transmitter")),
        }
    }

    pub fn delete_destination(&self, addr: &RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.delete_destination(addr)
    }

    pub fn clear_destinations(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.clear_destinations();
        Ok(())
    }

    pub fn join_multicast_group(&self, group: std::net::IpAddr) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.join_multicast_group(group)
    }

    pub fn leave_multicast_group(&self, group: std::net::IpAddr) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.leave_multicast_group(group)
    }

    pub fn leave_all_multicast_groups(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.leave_all_multicast_groups();
        Ok(())
    }

    pub fn set_receive_mode(&self, mode: ReceiveMode) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner.transmitter.set_receive_mode(mode);
        Ok(())
    }

    pub fn add_to_accept_list(&self, addr: RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.add_to_accept_list(addr));

        Ok(())
    }

    pub fn delete_from_accept_list(&self, addr: &RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.delete_from_accept_list(addr));

        Ok(())
    }

    pub fn clear_accept_list(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.clear_accept_list());

        Ok(())
    }

    pub fn add_to_ignore_list(&self, addr: RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.add_to_ignore_list(addr));

        Ok(())
    }

    pub fn delete_from_ignore_list(&self, addr: &RtpAddress) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.delete_from_ignore_list(addr));

        Ok(())
    }

    pub fn clear_ignore_list(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        self.inner
            .transmitter
            .with_filter(|filter| filter.clear_ignore_list());

        Ok(())
    }

    /// Hand a received packet to the session when running over an
    /// external transmitter.
    pub fn inject_data(
        &self,
        data: &[u8],
        addr: Option<RtpAddress>,
        is_rtcp: bool,
    ) -> Result<(), Error> {
        self.ensure_alive()?;
        match &self.inner.transmitter {
            Transmitter::External(it) => {
                it.inject(data, addr, is_rtcp);
                Ok(())
            }
            _ => Err(Error::Unsupported("not an external transmitter")),
        }
    }

    // ---- waiting and polling -------------------------------------

    /// Time until the scheduler wants to send the next RTCP compound;
    /// the natural poll granularity.
    pub fn rtcp_delay(&self) -> RtpTime {
        self.inner.scheduler.lock().transmission_delay(RtpTime::now())
    }

    /// Block until incoming data is available, up to `delay`.
    pub async fn wait_for_incoming_data(&self, delay: RtpTime) -> Result<bool, Error> {
        self.ensure_alive()?;
        let available = self.inner.transmitter.wait_for_incoming_data(delay).await;
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        Ok(available)
    }

    /// Wake the current or next wait; safe from any thread.
    pub fn abort_wait(&self) {
        self.inner.transmitter.abort_wait();
    }

    /// One iteration of the session loop: drain the transport, update
    /// the source table, run the timeout sweep, and transmit RTCP when
    /// the scheduler says so.
    pub async fn poll(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        if self.inner.internal_poll.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("the internal poll task owns the loop"));
        }

        self.process().await
    }

    async fn process(&self) -> Result<(), Error> {
        let inner = &self.inner;
        inner.transmitter.poll();

        for event in inner.transmitter.take_io_events() {
            match event.kind {
                IoEventKind::Receive => inner.observer.on_receive_error(&event.addr),
                IoEventKind::Send => inner.observer.on_send_error(&event.addr),
            }
        }

        while let Some(mut raw) = inner.transmitter.get_next_packet() {
            if !inner.observer.on_change_incoming_data(&mut raw) {
                continue;
            }

            self.process_raw_packet(raw)?;
        }

        self.timeout_sweep();
        self.rtcp_transmission().await
    }

    fn process_raw_packet(&self, raw: RawPacket) -> Result<(), Error> {
        let inner = &self.inner;
        let now = RtpTime::now();
        let from_self = raw
            .addr
            .as_ref()
            .map(|it| inner.transmitter.comes_from_this_transmitter(it))
            .unwrap_or(false);

        let mut own_collision = false;
        {
            let mut sources = inner.sources.lock();
            if raw.is_rtcp {
                match Compound::decode(raw.data.clone().freeze()) {
                    Ok(compound) => {
                        let size = compound.len();
                        sources.process_rtcp_compound(
                            &compound,
                            raw.receive_time,
                            raw.addr.as_ref(),
                            from_self,
                        );

                        let members = sources.member_count();
                        let mut scheduler = inner.scheduler.lock();
                        scheduler.analyse(size);
                        scheduler.reconsider_members(now, members);
                    }
                    Err(e) => {
                        log::trace!("malformed rtcp dropped: addr={:?}, err={:?}", raw.addr, e)
                    }
                }
            } else {
                match RtpPacket::decode(raw.data.clone().freeze()) {
                    Ok(packet) => {
                        sources.process_rtp(packet, raw.receive_time, raw.addr.as_ref(), from_self)
                    }
                    Err(e) => {
                        log::trace!("malformed rtp dropped: addr={:?}, err={:?}", raw.addr, e)
                    }
                }
            }

            if sources.own_collision() {
                sources.clear_own_collision();
                if let Some(addr) = raw.addr.clone() {
                    // only the first packet from a given looper address
                    // triggers the SSRC change
                    own_collision = sources.register_collision_address(addr, raw.receive_time);
                }
            }
        }

        if own_collision {
            self.change_own_ssrc(now)?;
        }

        Ok(())
    }

    /// Leave the colliding SSRC behind: say goodbye under the old
    /// identity if it ever spoke, then continue under a fresh one.
    fn change_own_ssrc(&self, now: RtpTime) -> Result<(), Error> {
        let inner = &self.inner;

        if inner.sent_packets.load(Ordering::SeqCst) {
            let (compound, members) = {
                let sources = inner.sources.lock();
                let mut builders = inner.builders.lock();
                let builders = &mut *builders;
                let we_sent = sources
                    .get(sources.own_ssrc())
                    .map(|it| it.is_sender())
                    .unwrap_or(false);

                (
                    builders
                        .rtcp
                        .build_bye(sources.own_ssrc(), &builders.rtp, we_sent, now, b"")?,
                    sources.member_count(),
                )
            };

            self.queue_bye(compound, members, now);
        }

        let new_ssrc = {
            let sources = inner.sources.lock();
            let mut rng = inner.rng.lock();
            loop {
                let candidate = rng.random_u32();
                if !sources.contains(candidate) {
                    break candidate;
                }
            }
        };

        log::info!("own ssrc collision, rotating: new-ssrc={:08x}", new_ssrc);
        inner
            .builders
            .lock()
            .rtp
            .rotate_ssrc(new_ssrc, &mut inner.rng.lock());

        inner.sources.lock().rotate_own(new_ssrc, now);
        inner.sent_packets.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn queue_bye(&self, compound: Compound, members: usize, now: RtpTime) {
        let inner = &self.inner;
        let size = compound.len();
        let mut byes = inner.byes.lock();
        byes.push_back(compound);

        // only the first queued packet arms the scheduler, the rest
        // are rescheduled as their predecessors leave
        if byes.len() == 1 {
            let members = if inner.config.request_immediate_bye {
                members
            } else {
                members.max(51)
            };

            inner
                .scheduler
                .lock()
                .schedule_bye(now, size, members, &mut inner.rng.lock());
        }
    }

    fn timeout_sweep(&self) {
        let inner = &self.inner;
        let now = RtpTime::now();

        let mut sources = inner.sources.lock();
        let td = {
            let scheduler = inner.scheduler.lock();
            scheduler.deterministic_interval(&self.group_state(&sources))
        };

        let intervals = TimeoutIntervals {
            sender: RtpTime::from_secs_f64(td * inner.config.timeouts.sender),
            member: RtpTime::from_secs_f64(td * inner.config.timeouts.member),
            bye: RtpTime::from_secs_f64(td * inner.config.timeouts.bye),
            note: RtpTime::from_secs_f64(td * inner.config.timeouts.note),
            collision: RtpTime::from_secs_f64(td * inner.config.timeouts.collision),
        };

        if sources.timeout_sweep(now, &intervals) {
            let members = sources.member_count();
            inner.scheduler.lock().reconsider_members(now, members);
        }
    }

    fn group_state(&self, sources: &Sources<RtpAddress, HandlerAdapter>) -> GroupState {
        GroupState {
            members: sources.member_count(),
            senders: sources.sender_count(),
            we_sent: sources
                .get(sources.own_ssrc())
                .map(|it| it.is_sender())
                .unwrap_or(false),
        }
    }

    async fn rtcp_transmission(&self) -> Result<(), Error> {
        let inner = &self.inner;
        let now = RtpTime::now();

        // decide and build under the locks, transmit after dropping
        // them
        let outgoing = {
            let mut sources = inner.sources.lock();
            let group = self.group_state(&sources);
            let due = {
                let mut scheduler = inner.scheduler.lock();
                let mut rng = inner.rng.lock();
                scheduler.is_time(now, &group, &mut rng)
            };

            if !due {
                None
            } else {
                let queued = inner.byes.lock().pop_front();
                let was_bye = queued.is_some();
                let compound = match queued {
                    Some(it) => it,
                    None => {
                        let mut builders = inner.builders.lock();
                        let builders = &mut *builders;
                        builders
                            .rtcp
                            .build_next(&mut sources, &builders.rtp, group.we_sent, now)?
                    }
                };

                let mut buf = BytesMut::with_capacity(compound.len());
                compound.encode(&mut buf)?;

                if was_bye {
                    // reschedule for the next queued goodbye, if any
                    let byes = inner.byes.lock();
                    if let Some(next) = byes.front() {
                        let size = next.len();
                        let members = group.members;
                        drop(byes);
                        inner.scheduler.lock().schedule_bye(
                            now,
                            size,
                            members,
                            &mut inner.rng.lock(),
                        );
                    }
                }

                Some((buf.freeze(), compound))
            }
        };

        if let Some((bytes, compound)) = outgoing {
            let bytes = inner.observer.on_change_rtp_or_rtcp_data(bytes, false);
            inner.transmitter.send_rtcp(&bytes).await?;
            inner.observer.on_sent_rtp_or_rtcp_data(&bytes, false);
            inner.observer.on_send_rtcp_compound_packet(&compound);
            inner.sent_packets.store(true, Ordering::SeqCst);
            inner.scheduler.lock().analyse(bytes.len());
            log::trace!("rtcp compound sent: size={}", bytes.len());
        }

        Ok(())
    }

    // ---- data access ---------------------------------------------

    /// Open the bracket for iterating sources and reading buffered
    /// packets.  Not recursive.
    pub fn begin_data_access(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        if self.inner.in_data_access.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("data access already open"));
        }

        self.inner.cursor.lock().current = None;
        Ok(())
    }

    pub fn end_data_access(&self) -> Result<(), Error> {
        if !self.inner.in_data_access.swap(false, Ordering::SeqCst) {
            return Err(Error::InvalidState("data access not open"));
        }

        Ok(())
    }

    pub fn goto_first_source(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, _| sources.first_ssrc(false))
    }

    pub fn goto_next_source(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, current| sources.next_ssrc(current?, false))
    }

    pub fn goto_previous_source(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, current| sources.prev_ssrc(current?, false))
    }

    pub fn goto_first_source_with_data(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, _| sources.first_ssrc(true))
    }

    pub fn goto_next_source_with_data(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, current| sources.next_ssrc(current?, true))
    }

    pub fn goto_previous_source_with_data(&self) -> Result<bool, Error> {
        self.cursor_move(|sources, current| sources.prev_ssrc(current?, true))
    }

    fn cursor_move(
        &self,
        f: impl FnOnce(&Sources<RtpAddress, HandlerAdapter>, Option<u32>) -> Option<u32>,
    ) -> Result<bool, Error> {
        self.ensure_data_access()?;
        let sources = self.inner.sources.lock();
        let mut cursor = self.inner.cursor.lock();
        cursor.current = f(&sources, cursor.current);
        Ok(cursor.current.is_some())
    }

    fn ensure_data_access(&self) -> Result<(), Error> {
        self.ensure_alive()?;
        if !self.inner.in_data_access.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("data access not open"));
        }

        Ok(())
    }

    /// The oldest unread packet of the currently selected source.
    pub fn get_next_packet(&self) -> Result<Option<RtpPacket>, Error> {
        self.ensure_data_access()?;
        let current = match self.inner.cursor.lock().current {
            Some(it) => it,
            None => return Ok(None),
        };

        Ok(self.inner.sources.lock().pop_packet(current))
    }

    pub fn get_current_source_info(&self) -> Result<Option<SourceInfo>, Error> {
        self.ensure_data_access()?;
        let current = match self.inner.cursor.lock().current {
            Some(it) => it,
            None => return Ok(None),
        };

        Ok(self.source_info(current))
    }

    pub fn get_source_info(&self, ssrc: u32) -> Option<SourceInfo> {
        self.source_info(ssrc)
    }

    fn source_info(&self, ssrc: u32) -> Option<SourceInfo> {
        let sources = self.inner.sources.lock();
        let source = sources.get(ssrc)?;

        Some(SourceInfo {
            ssrc,
            is_own: source.is_own(),
            is_sender: source.is_sender(),
            on_probation: source.on_probation(),
            packets_received: source.packets_received(),
            extended_highest_seq: source.extended_highest_seq(),
            jitter: source.jitter(),
            cname: source.cname().cloned(),
            sdes_items: source.sdes_items(),
            received_bye: source.received_bye(),
            bye_reason: source.bye_reason().cloned(),
            sender_info: source.sender_info().copied(),
            round_trip: source.round_trip(),
        })
    }

    // ---- lifecycle -----------------------------------------------

    fn spawn_poll_task(&self) {
        let session = self.clone();
        self.inner.internal_poll.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                if session.inner.stop.load(Ordering::SeqCst) {
                    break;
                }

                let delay = session
                    .rtcp_delay()
                    .min(RtpTime::new(1, 0))
                    .max(RtpTime::new(0, 10_000));

                session.inner.transmitter.wait_for_incoming_data(delay).await;
                if session.inner.stop.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = session.process().await {
                    log::error!("poll task error: {:?}", e);
                    session.inner.observer.on_poll_thread_error(&e);
                    break;
                }

                session.inner.observer.on_poll_thread_step();
            }
        });

        *self.inner.poll_task.lock() = Some(handle);
    }

    async fn stop_poll_task(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.transmitter.abort_wait();

        let handle = self.inner.poll_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.internal_poll.store(false, Ordering::SeqCst);
        self.inner.transmitter.clear_abort();
    }

    /// Say goodbye and shut down: queue a BYE compound (when anything
    /// was sent under this SSRC), drive the loop until it left or
    /// `max_wait` passed, then destroy the session.
    pub async fn bye_destroy(&self, max_wait: RtpTime, reason: &[u8]) -> Result<(), Error> {
        self.ensure_alive()?;
        self.stop_poll_task().await;

        let now = RtpTime::now();
        if self.inner.sent_packets.load(Ordering::SeqCst) {
            let (compound, members) = {
                let sources = self.inner.sources.lock();
                let mut builders = self.inner.builders.lock();
                let builders = &mut *builders;
                let we_sent = sources
                    .get(sources.own_ssrc())
                    .map(|it| it.is_sender())
                    .unwrap_or(false);

                (
                    builders.rtcp.build_bye(
                        sources.own_ssrc(),
                        &builders.rtp,
                        we_sent,
                        now,
                        reason,
                    )?,
                    sources.member_count(),
                )
            };

            self.queue_bye(compound, members, now);
        }

        let deadline = now + max_wait;
        while !self.inner.byes.lock().is_empty() {
            if RtpTime::now() >= deadline {
                break;
            }

            self.process().await?;
            if self.inner.byes.lock().is_empty() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.destroy().await;
        Ok(())
    }

    /// Tear the session down: stop the internal task, wake pending
    /// waiters with a cancellation, release the transport.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_poll_task().await;
        self.inner.transmitter.abort_wait();
        self.inner.transmitter.destroy().await;
        self.inner.byes.lock().clear();
        log::info!("session destroyed: ssrc={:08x}", self.local_ssrc());
    }
}
