pub mod stats;

use std::collections::VecDeque;

use ahash::{HashMap, HashMapExt};
use bytes::Bytes;
use codec::{
    rtcp::{Compound, ReceptionReport, RtcpPacket, SdesItemType},
    rtp::RtpPacket,
    time::{NtpTime, RtpTime},
};

use self::stats::{JitterState, MIN_SEQUENTIAL, SeqStatus, SequenceState};

/// How far apart a source under wallclock probation may space its
/// consecutive packets before the counter resets.
const PROBATION_WINDOW: RtpTime = RtpTime::from_secs(2);

/// Validation policy for sources first heard over RTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "kebab-case")
)]
pub enum ProbationType {
    /// Trust a source on its first packet.
    None,
    /// Require consecutive sequence numbers, RFC 3550 appendix A.1.
    #[default]
    Standard,
    /// Like `Standard`, but the consecutive packets also have to arrive
    /// within a two second window of each other.
    WallclockAndSequence,
}

/// The sender information of the most recent SR received from a
/// source, kept for LSR/DLSR round-trip computation and for the
/// application.
#[derive(Debug, Clone, Copy)]
pub struct SenderInfo {
    pub ntp_timestamp: NtpTime,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    /// Local instant the SR arrived, the base of the DLSR field.
    pub receive_time: RtpTime,
}

/// Notifications the source table raises while processing packets.
///
/// The session adapts these onto the application-facing observer; all
/// default implementations are inert.
#[allow(unused)]
pub trait SourceHandler: Send + Sync {
    /// A packet passed sequence validation.  Return true when the
    /// packet was consumed and must not be queued for the application.
    fn on_validated_rtp_packet(&self, ssrc: u32, packet: &RtpPacket, on_probation: bool) -> bool {
        false
    }

    fn on_rtcp_compound_packet(&self, compound: &Compound, receive_time: RtpTime) {}

    fn on_rtcp_sdes_item(&self, ssrc: u32, kind: SdesItemType, value: &[u8]) {}

    fn on_new_source(&self, ssrc: u32) {}

    fn on_remove_source(&self, ssrc: u32) {}

    /// A known source went silent past the member timeout.
    fn on_timeout(&self, ssrc: u32) {}

    fn on_bye(&self, ssrc: u32, reason: &[u8]) {}

    /// Another participant uses an SSRC already present in the table
    /// (our own included) from a different transport address.
    fn on_ssrc_collision(&self, ssrc: u32, is_rtp: bool) {}

    /// Two distinct sources claim the same CNAME.
    fn on_cname_collision(&self, ssrc: u32, cname: &[u8]) {}
}

/// One participant, keyed by SSRC.
pub struct Source<A> {
    ssrc: u32,
    own: bool,
    sender: bool,
    validated_by_rtcp: bool,
    rtp_addr: Option<A>,
    rtcp_addr: Option<A>,
    seq: Option<SequenceState>,
    jitter: JitterState,
    last_heard: RtpTime,
    last_rtp: Option<RtpTime>,
    last_probation: Option<RtpTime>,
    sr: Option<SenderInfo>,
    /// The latest reception report another participant sent about our
    /// stream.
    report: Option<(ReceptionReport, RtpTime)>,
    sdes: HashMap<SdesItemType, Bytes>,
    note_time: Option<RtpTime>,
    bye_reason: Option<Bytes>,
    bye_time: Option<RtpTime>,
    queue: VecDeque<RtpPacket>,
}

impl<A> Source<A> {
    fn new(ssrc: u32, own: bool, now: RtpTime) -> Self {
        Self {
            ssrc,
            own,
            sender: false,
            validated_by_rtcp: false,
            rtp_addr: None,
            rtcp_addr: None,
            seq: None,
            jitter: JitterState::default(),
            last_heard: now,
            last_rtp: None,
            last_probation: None,
            sr: None,
            report: None,
            sdes: HashMap::new(),
            note_time: None,
            bye_reason: None,
            bye_time: None,
            queue: VecDeque::new(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn is_own(&self) -> bool {
        self.own
    }

    pub fn is_sender(&self) -> bool {
        self.sender
    }

    /// Whether this source counts towards the member estimate: it is
    /// our own entry, it survived probation, or it spoke RTCP.
    pub fn is_active(&self) -> bool {
        self.own
            || self.validated_by_rtcp
            || self
                .seq
                .as_ref()
                .map(|it| !it.on_probation())
                .unwrap_or(false)
    }

    pub fn on_probation(&self) -> bool {
        !self.validated_by_rtcp
            && self
                .seq
                .as_ref()
                .map(|it| it.on_probation())
                .unwrap_or(false)
    }

    pub fn has_data(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn packets_received(&self) -> u32 {
        self.seq
            .as_ref()
            .map(|it| it.packets_received())
            .unwrap_or(0)
    }

    pub fn extended_highest_seq(&self) -> Option<u32> {
        self.seq.as_ref().map(|it| it.extended_highest())
    }

    pub fn cycles(&self) -> u32 {
        self.seq.as_ref().map(|it| it.cycles()).unwrap_or(0)
    }

    pub fn max_seq(&self) -> Option<u16> {
        self.seq.as_ref().map(|it| it.max_seq())
    }

    pub fn jitter(&self) -> u32 {
        self.jitter.jitter_units()
    }

    pub fn last_heard(&self) -> RtpTime {
        self.last_heard
    }

    pub fn sender_info(&self) -> Option<&SenderInfo> {
        self.sr.as_ref()
    }

    /// The reception report another participant most recently sent
    /// about our own stream.
    pub fn reception_report(&self) -> Option<&ReceptionReport> {
        self.report.as_ref().map(|(it, _)| it)
    }

    pub fn sdes_item(&self, kind: SdesItemType) -> Option<&Bytes> {
        self.sdes.get(&kind)
    }

    pub fn cname(&self) -> Option<&Bytes> {
        self.sdes_item(SdesItemType::Cname)
    }

    /// Snapshot of every stored SDES item.
    pub fn sdes_items(&self) -> Vec<(SdesItemType, Bytes)> {
        self.sdes
            .iter()
            .map(|(kind, value)| (*kind, value.clone()))
            .collect()
    }

    pub fn received_bye(&self) -> bool {
        self.bye_time.is_some()
    }

    pub fn bye_reason(&self) -> Option<&Bytes> {
        self.bye_reason.as_ref()
    }

    /// Round-trip estimate from the LSR/DLSR fields of the most recent
    /// report this source sent about our stream: the report's arrival
    /// instant minus the delay it sat remotely minus our SR timestamp,
    /// all in the 16.16 second format of the wire fields.
    pub fn round_trip(&self) -> Option<RtpTime> {
        let (report, arrival) = self.report.as_ref()?;
        if report.lsr == 0 {
            return None;
        }

        let arrival_word = NtpTime::from(*arrival).middle_32();
        let rtt = arrival_word
            .wrapping_sub(report.lsr)
            .wrapping_sub(report.dlsr);

        // negative wrap means the clocks disagree, no estimate then
        if rtt & 0x8000_0000 != 0 {
            return None;
        }

        Some(RtpTime::from_secs_f64(rtt as f64 / 65536.0))
    }

    /// The LSR word a report block about this source should carry.
    pub fn last_sr_word(&self) -> u32 {
        self.sr
            .as_ref()
            .map(|it| it.ntp_timestamp.middle_32())
            .unwrap_or(0)
    }

    /// The DLSR word: time elapsed since that SR arrived, in 1/65536 s.
    pub fn delay_since_last_sr(&self, now: RtpTime) -> u32 {
        self.sr
            .as_ref()
            .map(|it| ((now - it.receive_time).as_secs_f64() * 65536.0) as u32)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct SourcesOptions {
    pub probation_type: ProbationType,
    /// Consecutive packets required by probation.
    pub min_sequential: u32,
    /// Seconds per RTP clock tick, drives the jitter estimate.
    pub timestamp_unit: f64,
    /// Deliver packets looped back from our own transmitter.
    pub accept_own_packets: bool,
}

impl Default for SourcesOptions {
    fn default() -> Self {
        Self {
            probation_type: ProbationType::default(),
            min_sequential: MIN_SEQUENTIAL,
            timestamp_unit: 0.0,
            accept_own_packets: false,
        }
    }
}

/// Timeout intervals for one sweep pass, already multiplied out from
/// the deterministic RTCP interval.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutIntervals {
    pub sender: RtpTime,
    pub member: RtpTime,
    pub bye: RtpTime,
    pub note: RtpTime,
    pub collision: RtpTime,
}

/// The participant table of the session.
///
/// Tracks every SSRC heard on the data or control channel, validates
/// new sources through probation, maintains reception statistics, and
/// detects SSRC collisions, including collisions against our own
/// identity.
pub struct Sources<A, T> {
    options: SourcesOptions,
    table: HashMap<u32, Source<A>>,
    /// Addresses we already detected an own-SSRC collision with, so a
    /// persistent looper does not force an SSRC change per packet.
    collisions: Vec<(A, RtpTime)>,
    own_ssrc: u32,
    own_collision: bool,
    handler: T,
}

impl<A, T> Sources<A, T>
where
    A: Clone + PartialEq,
    T: SourceHandler,
{
    pub fn new(options: SourcesOptions, own_ssrc: u32, handler: T) -> Self {
        let mut this = Self {
            options,
            table: HashMap::with_capacity(32),
            collisions: Vec::new(),
            own_ssrc,
            own_collision: false,
            handler,
        };

        this.table
            .insert(own_ssrc, Source::new(own_ssrc, true, RtpTime::now()));

        this
    }

    pub fn options(&self) -> &SourcesOptions {
        &self.options
    }

    pub fn set_timestamp_unit(&mut self, unit: f64) {
        self.options.timestamp_unit = unit;
    }

    pub fn own_ssrc(&self) -> u32 {
        self.own_ssrc
    }

    pub fn contains(&self, ssrc: u32) -> bool {
        self.table.contains_key(&ssrc)
    }

    pub fn get(&self, ssrc: u32) -> Option<&Source<A>> {
        self.table.get(&ssrc)
    }

    /// Number of active session members, our own entry included.
    pub fn member_count(&self) -> usize {
        self.table.values().filter(|it| it.is_active()).count()
    }

    pub fn sender_count(&self) -> usize {
        self.table.values().filter(|it| it.is_sender()).count()
    }

    /// Mark our own entry as a sender after an outgoing data packet.
    pub fn mark_own_sender(&mut self, now: RtpTime) {
        if let Some(own) = self.table.get_mut(&self.own_ssrc) {
            own.sender = true;
            own.last_rtp = Some(now);
            own.last_heard = now;
        }
    }

    pub fn own_collision(&self) -> bool {
        self.own_collision
    }

    pub fn clear_own_collision(&mut self) {
        self.own_collision = false;
    }

    /// Record the address an own-SSRC collision came from.  Returns
    /// true the first time the address is seen; repeated packets from
    /// the same looper are then ignored.
    pub fn register_collision_address(&mut self, addr: A, now: RtpTime) -> bool {
        if let Some(entry) = self.collisions.iter_mut().find(|(it, _)| *it == addr) {
            entry.1 = now;
            return false;
        }

        self.collisions.push((addr, now));
        true
    }

    /// Replace our own identity after a collision.  The caller picks a
    /// fresh SSRC, not present in the table.
    pub fn rotate_own(&mut self, new_ssrc: u32, now: RtpTime) {
        self.table.remove(&self.own_ssrc);
        self.handler.on_remove_source(self.own_ssrc);
        self.own_ssrc = new_ssrc;
        self.table
            .insert(new_ssrc, Source::new(new_ssrc, true, now));

        self.own_collision = false;
    }

    /// Process one successfully parsed RTP packet.
    pub fn process_rtp(
        &mut self,
        packet: RtpPacket,
        receive_time: RtpTime,
        addr: Option<&A>,
        from_self: bool,
    ) {
        let ssrc = packet.ssrc;

        if ssrc == self.own_ssrc && !from_self {
            // Someone else is transmitting under our identity.
            self.own_collision = true;
            self.handler.on_ssrc_collision(ssrc, true);
            return;
        }

        if from_self && !self.options.accept_own_packets {
            return;
        }

        if !self.table.contains_key(&ssrc) {
            let mut source = Source::new(ssrc, false, receive_time);
            source.rtp_addr = addr.cloned();
            self.table.insert(ssrc, source);
            self.handler.on_new_source(ssrc);
        }

        // Third-party collision: the SSRC is known under a different
        // transport address.  The first arriving address keeps the
        // entry, later ones are reported and dropped.
        let collided = {
            let source = match self.table.get_mut(&ssrc) {
                Some(it) => it,
                None => return,
            };

            if from_self {
                false
            } else {
                match (&source.rtp_addr, addr) {
                    (Some(known), Some(seen)) if known != seen => true,
                    (None, Some(seen)) => {
                        source.rtp_addr = Some(seen.clone());
                        false
                    }
                    _ => false,
                }
            }
        };

        if collided {
            self.handler.on_ssrc_collision(ssrc, true);
            return;
        }

        let min_sequential = match self.options.probation_type {
            ProbationType::None => 0,
            _ => self.options.min_sequential,
        };

        let source = match self.table.get_mut(&ssrc) {
            Some(it) => it,
            None => return,
        };

        let status = match source.seq.as_mut() {
            Some(seq) => seq.update(packet.sequence_number),
            None => {
                let mut state = SequenceState::new(packet.sequence_number, min_sequential);
                let status = if min_sequential == 0 {
                    SeqStatus::Valid
                } else {
                    state.update(packet.sequence_number)
                };

                source.seq = Some(state);
                status
            }
        };

        match status {
            SeqStatus::Probation => {
                // wallclock probation also bounds the packet spacing
                if self.options.probation_type == ProbationType::WallclockAndSequence {
                    let stale = source
                        .last_probation
                        .map(|it| receive_time - it > PROBATION_WINDOW)
                        .unwrap_or(false);

                    if stale {
                        let mut state =
                            SequenceState::new(packet.sequence_number, min_sequential);
                        state.update(packet.sequence_number);
                        source.seq = Some(state);
                    }
                }

                source.last_probation = Some(receive_time);
                source.last_heard = receive_time;
                self.handler.on_validated_rtp_packet(ssrc, &packet, true);
            }
            SeqStatus::Valid | SeqStatus::Promoted => {
                source.last_heard = receive_time;
                source.last_rtp = Some(receive_time);
                source.sender = true;
                source
                    .jitter
                    .update(receive_time, packet.timestamp, self.options.timestamp_unit);

                if !self.handler.on_validated_rtp_packet(ssrc, &packet, false) {
                    let source = match self.table.get_mut(&ssrc) {
                        Some(it) => it,
                        None => return,
                    };

                    source.queue.push_back(packet);
                }
            }
            SeqStatus::Invalid => {}
        }
    }

    /// Process one RTCP compound packet.  All table updates for one
    /// compound happen back to back, with no interleaved delivery.
    pub fn process_rtcp_compound(
        &mut self,
        compound: &Compound,
        receive_time: RtpTime,
        addr: Option<&A>,
        from_self: bool,
    ) {
        if from_self && !self.options.accept_own_packets {
            return;
        }

        self.handler.on_rtcp_compound_packet(compound, receive_time);

        for packet in &compound.0 {
            match packet {
                RtcpPacket::SenderReport(sr) => {
                    if self.check_rtcp_ssrc(sr.ssrc, receive_time, addr, from_self) {
                        self.store_reports(sr.ssrc, &sr.reports, receive_time);
                        if let Some(source) = self.table.get_mut(&sr.ssrc) {
                            source.sr = Some(SenderInfo {
                                ntp_timestamp: sr.ntp_timestamp,
                                rtp_timestamp: sr.rtp_timestamp,
                                packet_count: sr.packet_count,
                                octet_count: sr.octet_count,
                                receive_time,
                            });
                        }
                    }
                }
                RtcpPacket::ReceiverReport(rr) => {
                    if self.check_rtcp_ssrc(rr.ssrc, receive_time, addr, from_self) {
                        self.store_reports(rr.ssrc, &rr.reports, receive_time);
                    }
                }
                RtcpPacket::SourceDescription(sdes) => {
                    for chunk in &sdes.chunks {
                        if !self.check_rtcp_ssrc(chunk.ssrc, receive_time, addr, from_self) {
                            continue;
                        }

                        for item in &chunk.items {
                            self.store_sdes_item(chunk.ssrc, item.kind, &item.value, receive_time);
                        }
                    }
                }
                RtcpPacket::Goodbye(bye) => {
                    for ssrc in &bye.sources {
                        let source = match self.table.get_mut(ssrc) {
                            Some(it) if !it.own && it.bye_time.is_none() => it,
                            _ => continue,
                        };

                        source.bye_time = Some(receive_time);
                        source.bye_reason = Some(bye.reason.clone());
                        source.sender = false;
                        source.last_heard = receive_time;
                        self.handler.on_bye(*ssrc, &bye.reason);
                    }
                }
                RtcpPacket::App(_) | RtcpPacket::Unknown { .. } => {}
            }
        }
    }

    /// Collision and bookkeeping checks shared by every RTCP packet
    /// type.  Returns false when the packet must not touch the table.
    fn check_rtcp_ssrc(
        &mut self,
        ssrc: u32,
        receive_time: RtpTime,
        addr: Option<&A>,
        from_self: bool,
    ) -> bool {
        if ssrc == self.own_ssrc && !from_self {
            self.own_collision = true;
            self.handler.on_ssrc_collision(ssrc, false);
            return false;
        }

        if !self.table.contains_key(&ssrc) {
            let mut source = Source::new(ssrc, false, receive_time);
            source.rtcp_addr = addr.cloned();
            source.validated_by_rtcp = true;
            self.table.insert(ssrc, source);
            self.handler.on_new_source(ssrc);
            return true;
        }

        let collided = {
            let source = match self.table.get_mut(&ssrc) {
                Some(it) => it,
                None => return false,
            };

            if from_self || source.own {
                false
            } else {
                match (&source.rtcp_addr, addr) {
                    (Some(known), Some(seen)) if known != seen => true,
                    (None, Some(seen)) => {
                        source.rtcp_addr = Some(seen.clone());
                        false
                    }
                    _ => false,
                }
            }
        };

        if collided {
            self.handler.on_ssrc_collision(ssrc, false);
            return false;
        }

        if let Some(source) = self.table.get_mut(&ssrc) {
            source.validated_by_rtcp = true;
            source.last_heard = receive_time;
        }

        true
    }

    fn store_reports(&mut self, from: u32, reports: &[ReceptionReport], receive_time: RtpTime) {
        for report in reports {
            if report.ssrc != self.own_ssrc {
                continue;
            }

            if let Some(source) = self.table.get_mut(&from) {
                source.report = Some((*report, receive_time));
            }
        }
    }

    fn store_sdes_item(
        &mut self,
        ssrc: u32,
        kind: SdesItemType,
        value: &Bytes,
        receive_time: RtpTime,
    ) {
        if kind == SdesItemType::Cname {
            // a CNAME owned by a different SSRC is a likely collision
            let taken = self.table.values().any(|other| {
                other.ssrc != ssrc && other.cname().map(|it| it == value).unwrap_or(false)
            });

            if taken {
                self.handler.on_cname_collision(ssrc, value);
            }
        }

        if let Some(source) = self.table.get_mut(&ssrc) {
            if kind == SdesItemType::Note {
                source.note_time = Some(receive_time);
            }

            source.sdes.insert(kind, value.clone());
            self.handler.on_rtcp_sdes_item(ssrc, kind, value);
        }
    }

    /// One timeout sweep over the table and the collision list.
    ///
    /// Returns true when the member estimate shrank, which the caller
    /// feeds into the scheduler's reverse reconsideration.
    pub fn timeout_sweep(&mut self, now: RtpTime, intervals: &TimeoutIntervals) -> bool {
        let members_before = self.member_count();
        let mut removed = Vec::new();

        for source in self.table.values_mut() {
            // a sender that went quiet is still a member
            if source.sender {
                let quiet = source
                    .last_rtp
                    .map(|it| now - it > intervals.sender)
                    .unwrap_or(true);

                if quiet {
                    source.sender = false;
                }
            }

            if source.own {
                continue;
            }

            let note_stale = source
                .note_time
                .map(|it| now - it > intervals.note)
                .unwrap_or(false);

            if note_stale {
                source.note_time = None;
                source.sdes.remove(&SdesItemType::Note);
            }

            let expired = match source.bye_time {
                Some(bye) => now - bye > intervals.bye,
                None => now - source.last_heard > intervals.member,
            };

            if expired {
                removed.push((source.ssrc, source.bye_time.is_none()));
            }
        }

        for (ssrc, timed_out) in removed {
            self.table.remove(&ssrc);
            if timed_out {
                self.handler.on_timeout(ssrc);
            }

            self.handler.on_remove_source(ssrc);
        }

        self.collisions
            .retain(|(_, seen)| now - *seen <= intervals.collision);

        self.member_count() < members_before
    }

    /// Iteration in ascending SSRC order; `with_data` restricts the
    /// walk to sources with unread packets.
    pub fn first_ssrc(&self, with_data: bool) -> Option<u32> {
        self.table
            .values()
            .filter(|it| !with_data || it.has_data())
            .map(|it| it.ssrc)
            .min()
    }

    pub fn next_ssrc(&self, current: u32, with_data: bool) -> Option<u32> {
        self.table
            .values()
            .filter(|it| it.ssrc > current && (!with_data || it.has_data()))
            .map(|it| it.ssrc)
            .min()
    }

    pub fn prev_ssrc(&self, current: u32, with_data: bool) -> Option<u32> {
        self.table
            .values()
            .filter(|it| it.ssrc < current && (!with_data || it.has_data()))
            .map(|it| it.ssrc)
            .max()
    }

    /// Dequeue the oldest unread packet of a source.
    pub fn pop_packet(&mut self, ssrc: u32) -> Option<RtpPacket> {
        self.table.get_mut(&ssrc)?.queue.pop_front()
    }

    /// All sources that currently qualify for a report block: active
    /// senders other than ourselves.
    pub fn report_targets(&self) -> Vec<u32> {
        let mut targets = self
            .table
            .values()
            .filter(|it| !it.own && it.sender && it.seq.is_some())
            .map(|it| it.ssrc)
            .collect::<Vec<u32>>();

        targets.sort_unstable();
        targets
    }

    /// Build one report block about a source, advancing its loss
    /// interval snapshot.
    pub fn make_report(&mut self, ssrc: u32, now: RtpTime) -> Option<ReceptionReport> {
        let source = self.table.get_mut(&ssrc)?;
        let seq = source.seq.as_mut()?;

        Some(ReceptionReport {
            ssrc,
            fraction_lost: seq.fraction_lost(),
            cumulative_lost: seq.cumulative_lost(),
            extended_highest_seq: seq.extended_highest(),
            jitter: source.jitter.jitter_units(),
            lsr: source.last_sr_word(),
            dlsr: source.delay_since_last_sr(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Inert;

    impl SourceHandler for Inert {}

    fn rtp(ssrc: u32, seq: u16) -> RtpPacket {
        RtpPacket {
            marker: false,
            payload_type: 96,
            sequence_number: seq,
            timestamp: seq as u32 * 160,
            ssrc,
            csrc: vec![],
            extension: None,
            payload: Bytes::from_static(b"x"),
        }
    }

    fn table() -> Sources<u32, Inert> {
        Sources::new(
            SourcesOptions {
                timestamp_unit: 1.0 / 8000.0,
                ..SourcesOptions::default()
            },
            0xAAAA,
            Inert,
        )
    }

    #[test]
    fn probation_holds_back_then_promotes() {
        let mut sources = table();
        let now = RtpTime::new(10, 0);

        sources.process_rtp(rtp(1, 100), now, Some(&1), false);
        assert!(sources.get(1).unwrap().on_probation());
        assert_eq!(sources.member_count(), 1);

        sources.process_rtp(rtp(1, 101), now, Some(&1), false);
        assert!(!sources.get(1).unwrap().on_probation());
        assert_eq!(sources.member_count(), 2);
        assert_eq!(sources.sender_count(), 1);
        assert!(sources.get(1).unwrap().has_data());
    }

    #[test]
    fn own_ssrc_from_elsewhere_flags_collision() {
        let mut sources = table();
        let now = RtpTime::new(10, 0);

        sources.process_rtp(rtp(0xAAAA, 5), now, Some(&9), false);
        assert!(sources.own_collision());

        assert!(sources.register_collision_address(9, now));
        assert!(!sources.register_collision_address(9, now));

        sources.rotate_own(0xBBBB, now);
        assert_eq!(sources.own_ssrc(), 0xBBBB);
        assert!(!sources.own_collision());
        assert!(!sources.contains(0xAAAA));
    }

    #[test]
    fn bye_then_sweep_removes_member() {
        let mut sources = table();
        let now = RtpTime::new(10, 0);

        sources.process_rtp(rtp(1, 100), now, Some(&1), false);
        sources.process_rtp(rtp(1, 101), now, Some(&1), false);
        assert_eq!(sources.member_count(), 2);

        let compound = Compound(vec![RtcpPacket::Goodbye(codec::rtcp::Goodbye {
            sources: vec![1],
            reason: Bytes::from_static(b"done"),
        })]);

        sources.process_rtcp_compound(&compound, now, Some(&1), false);
        assert!(sources.get(1).unwrap().received_bye());
        assert!(!sources.get(1).unwrap().is_sender());

        let intervals = TimeoutIntervals {
            sender: RtpTime::from_secs(10),
            member: RtpTime::from_secs(25),
            bye: RtpTime::from_secs(5),
            note: RtpTime::from_secs(125),
            collision: RtpTime::from_secs(50),
        };

        let shrank = sources.timeout_sweep(RtpTime::new(16, 1), &intervals);
        assert!(shrank);
        assert_eq!(sources.member_count(), 1);
    }

    #[test]
    fn sender_status_expires_quietly() {
        let mut sources = table();
        let now = RtpTime::new(10, 0);

        sources.process_rtp(rtp(1, 100), now, Some(&1), false);
        sources.process_rtp(rtp(1, 101), now, Some(&1), false);
        assert_eq!(sources.sender_count(), 1);

        let intervals = TimeoutIntervals {
            sender: RtpTime::from_secs(10),
            member: RtpTime::from_secs(250),
            bye: RtpTime::from_secs(5),
            note: RtpTime::from_secs(125),
            collision: RtpTime::from_secs(50),
        };

        let shrank = sources.timeout_sweep(RtpTime::new(21, 0), &intervals);
        assert!(!shrank);
        assert_eq!(sources.sender_count(), 0);
        assert_eq!(sources.member_count(), 2);
    }

    #[test]
    fn rtcp_creates_member_and_stores_sdes() {
        let mut sources = table();
        let now = RtpTime::new(10, 0);

        let compound = Compound(vec![
            RtcpPacket::ReceiverReport(codec::rtcp::ReceiverReport {
                ssrc: 7,
                reports: vec![],
            }),
            RtcpPacket::SourceDescription(codec::rtcp::Sdes {
                chunks: vec![codec::rtcp::SdesChunk {
                    ssrc: 7,
                    items: vec![codec::rtcp::SdesItem::new(
                        SdesItemType::Cname,
                        b"user@host",
                    )],
                }],
            }),
        ]);

        sources.process_rtcp_compound(&compound, now, Some(&7), false);
        assert_eq!(sources.member_count(), 2);
        assert_eq!(
            sources.get(7).unwrap().cname().map(|it| &it[..]),
            Some(&b"user@host"[..])
        );
    }
}
