use std::collections::VecDeque;

use bytes::Bytes;
use codec::{
    rtcp::{
        App, Compound, Goodbye, ReceiverReport, ReceptionReport, RtcpPacket, Sdes, SdesChunk,
        SdesItem, SdesItemType, SenderReport,
    },
    time::{NtpTime, RtpTime},
};

use crate::{
    Error,
    builder::RtpBuilder,
    sources::{SourceHandler, Sources},
};

/// Report blocks one SR/RR primitive can carry.
const MAX_REPORTS_PER_PACKET: usize = 31;

/// How often the optional SDES items ride along, counted in compound
/// packets.  Zero means never; the CNAME is always included.
#[derive(Debug, Clone, Copy, Default)]
pub struct SdesIntervals {
    pub name: u32,
    pub email: u32,
    pub phone: u32,
    pub location: u32,
    pub tool: u32,
    pub note: u32,
}

#[derive(Debug, Clone)]
pub struct RtcpBuilderOptions {
    pub max_packet_size: usize,
    /// Seconds per RTP clock tick, for extrapolating the SR timestamp.
    pub timestamp_unit: f64,
    /// Delay between sampling an outgoing packet and handing it to the
    /// transport, folded into the SR RTP timestamp.
    pub pre_transmission_delay: f64,
    pub cname: Bytes,
    pub intervals: SdesIntervals,
}

/// Builds the outgoing RTCP compound packets from source table state:
/// periodic SR/RR+SDES compounds, BYE compounds, and queued APP
/// packets.
pub struct RtcpBuilder {
    options: RtcpBuilderOptions,
    /// Compounds built so far, the base of the SDES interval counters.
    counters: [u32; 6],
    name: Option<Bytes>,
    email: Option<Bytes>,
    phone: Option<Bytes>,
    location: Option<Bytes>,
    tool: Option<Bytes>,
    note: Option<Bytes>,
    apps: VecDeque<App>,
}

impl RtcpBuilder {
    pub fn new(options: RtcpBuilderOptions) -> Self {
        Self {
            options,
            counters: [0; 6],
            name: None,
            email: None,
            phone: None,
            location: None,
            tool: None,
            note: None,
            apps: VecDeque::new(),
        }
    }

    pub fn options_mut(&mut self) -> &mut RtcpBuilderOptions {
        &mut self.options
    }

    pub fn cname(&self) -> &Bytes {
        &self.options.cname
    }

    pub fn set_local_item(&mut self, kind: SdesItemType, value: &[u8]) -> Result<(), Error> {
        if value.len() > 255 {
            return Err(Error::SdesItemTooLong);
        }

        let value = Bytes::copy_from_slice(value);
        match kind {
            SdesItemType::Cname => self.options.cname = value,
            SdesItemType::Name => self.name = Some(value),
            SdesItemType::Email => self.email = Some(value),
            SdesItemType::Phone => self.phone = Some(value),
            SdesItemType::Location => self.location = Some(value),
            SdesItemType::Tool => self.tool = Some(value),
            SdesItemType::Note => self.note = Some(value),
            SdesItemType::Priv => {}
        }

        Ok(())
    }

    pub fn set_interval(&mut self, kind: SdesItemType, interval: u32) {
        match kind {
            SdesItemType::Name => self.options.intervals.name = interval,
            SdesItemType::Email => self.options.intervals.email = interval,
            SdesItemType::Phone => self.options.intervals.phone = interval,
            SdesItemType::Location => self.options.intervals.location = interval,
            SdesItemType::Tool => self.options.intervals.tool = interval,
            SdesItemType::Note => self.options.intervals.note = interval,
            _ => {}
        }
    }

    /// Queue an application-defined packet for the next compound.
    pub fn queue_app(
        &mut self,
        subtype: u8,
        name: [u8; 4],
        ssrc: u32,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.len() % 4 != 0 || 12 + data.len() > self.options.max_packet_size {
            return Err(Error::Codec(codec::Error::BadAppData));
        }

        self.apps.push_back(App {
            subtype,
            ssrc,
            name,
            data: Bytes::copy_from_slice(data),
        });

        Ok(())
    }

    /// Build the next periodic compound: SR or RR, report blocks for
    /// every active sender, the SDES packet, and any queued APP
    /// packets, all within the maximum packet size.
    pub fn build_next<A, T>(
        &mut self,
        sources: &mut Sources<A, T>,
        rtp: &RtpBuilder,
        we_sent: bool,
        now: RtpTime,
    ) -> Result<Compound, Error>
    where
        A: Clone + PartialEq,
        T: SourceHandler,
    {
        let own_ssrc = sources.own_ssrc();
        let sdes = self.build_sdes(own_ssrc);

        // every block is 24 bytes; whatever does not fit next to the
        // mandatory parts is silently left for the next interval
        let base = if we_sent { 28 } else { 8 };
        let budget = self
            .options
            .max_packet_size
            .saturating_sub(base + sdes.len());

        let mut reports = Vec::new();
        for ssrc in sources.report_targets() {
            if (reports.len() + 1) * ReceptionReport::SIZE > budget {
                break;
            }

            if let Some(report) = sources.make_report(ssrc, now) {
                reports.push(report);
            }
        }

        let mut packets = Vec::with_capacity(4);
        let mut spill = reports.split_off(reports.len().min(MAX_REPORTS_PER_PACKET));

        packets.push(if we_sent {
            RtcpPacket::SenderReport(self.build_sender_info(own_ssrc, rtp, now, reports))
        } else {
            RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: own_ssrc,
                reports,
            })
        });

        while !spill.is_empty() {
            let rest = spill.split_off(spill.len().min(MAX_REPORTS_PER_PACKET));
            packets.push(RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: own_ssrc,
                reports: spill,
            }));

            spill = rest;
        }

        packets.push(RtcpPacket::SourceDescription(sdes));

        let mut size = packets.iter().map(|it| it.len()).sum::<usize>();
        while let Some(app) = self.apps.front() {
            if size + app.len() > self.options.max_packet_size {
                break;
            }

            size += app.len();
            if let Some(app) = self.apps.pop_front() {
                packets.push(RtcpPacket::App(app));
            }
        }

        Ok(Compound(packets))
    }

    /// Build a BYE compound for our own SSRC.  The report packet is
    /// kept minimal; the point of the compound is the goodbye.
    pub fn build_bye(
        &mut self,
        own_ssrc: u32,
        rtp: &RtpBuilder,
        we_sent: bool,
        now: RtpTime,
        reason: &[u8],
    ) -> Result<Compound, Error> {
        if reason.len() > 255 {
            return Err(Error::Codec(codec::Error::ReasonTooLong));
        }

        let first = if we_sent {
            RtcpPacket::SenderReport(self.build_sender_info(own_ssrc, rtp, now, Vec::new()))
        } else {
            RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: own_ssrc,
                reports: Vec::new(),
            })
        };

        Ok(Compound(vec![
            first,
            RtcpPacket::SourceDescription(Sdes {
                chunks: vec![SdesChunk {
                    ssrc: own_ssrc,
                    items: vec![SdesItem {
                        kind: SdesItemType::Cname,
                        value: self.options.cname.clone(),
                    }],
                }],
            }),
            RtcpPacket::Goodbye(Goodbye {
                sources: vec![own_ssrc],
                reason: Bytes::copy_from_slice(reason),
            }),
        ]))
    }

    fn build_sender_info(
        &self,
        own_ssrc: u32,
        rtp: &RtpBuilder,
        now: RtpTime,
        reports: Vec<ReceptionReport>,
    ) -> SenderReport {
        // Extrapolate the RTP clock from the instant of the last data
        // packet to "now", so the SR maps wallclock to media time.
        let elapsed = rtp
            .last_send_time()
            .map(|it| (now - it).as_secs_f64())
            .unwrap_or(0.0)
            + self.options.pre_transmission_delay;

        let ticks = if self.options.timestamp_unit > 0.0 {
            (elapsed / self.options.timestamp_unit) as u32
        } else {
            0
        };

        SenderReport {
            ssrc: own_ssrc,
            ntp_timestamp: NtpTime::from(now),
            rtp_timestamp: rtp.timestamp().wrapping_add(ticks),
            packet_count: rtp.packet_count(),
            octet_count: rtp.octet_count(),
            reports,
        }
    }

    fn build_sdes(&mut self, own_ssrc: u32) -> Sdes {
        let mut items = vec![SdesItem {
            kind: SdesItemType::Cname,
            value: self.options.cname.clone(),
        }];

        let optional: [(usize, u32, SdesItemType, Option<&Bytes>); 6] = [
            (0, self.options.intervals.name, SdesItemType::Name, self.name.as_ref()),
            (1, self.options.intervals.email, SdesItemType::Email, self.email.as_ref()),
            (2, self.options.intervals.phone, SdesItemType::Phone, self.phone.as_ref()),
            (3, self.options.intervals.location, SdesItemType::Location, self.location.as_ref()),
            (4, self.options.intervals.tool, SdesItemType::Tool, self.tool.as_ref()),
            (5, self.options.intervals.note, SdesItemType::Note, self.note.as_ref()),
        ];

        let mut due = [false; 6];
        for (index, interval, _, value) in optional.iter() {
            if *interval == 0 || value.is_none() {
                continue;
            }

            self.counters[*index] += 1;
            if self.counters[*index] >= *interval {
                due[*index] = true;
            }
        }

        for (index, _, kind, value) in optional {
            if !due[index] {
                continue;
            }

            if let Some(value) = value {
                items.push(SdesItem {
                    kind,
                    value: value.clone(),
                });
            }
        }

        for (index, flag) in due.iter().enumerate() {
            if *flag {
                self.counters[index] = 0;
            }
        }

        Sdes {
            chunks: vec![SdesChunk {
                ssrc: own_ssrc,
                items,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        random::RtpRandom,
        sources::{SourceHandler, Sources, SourcesOptions},
    };
    use codec::rtp::RtpPacket;

    struct Inert;

    impl SourceHandler for Inert {}

    fn options() -> RtcpBuilderOptions {
        RtcpBuilderOptions {
            max_packet_size: 65535,
            timestamp_unit: 1.0 / 8000.0,
            pre_transmission_delay: 0.0,
            cname: Bytes::from_static(b"user@host"),
            intervals: SdesIntervals::default(),
        }
    }

    fn feed(sources: &mut Sources<u32, Inert>, ssrc: u32, seqs: &[u16], now: RtpTime) {
        for seq in seqs {
            sources.process_rtp(
                RtpPacket {
                    marker: false,
                    payload_type: 0,
                    sequence_number: *seq,
                    timestamp: *seq as u32 * 160,
                    ssrc,
                    csrc: vec![],
                    extension: None,
                    payload: Bytes::from_static(b"12345"),
                },
                now,
                Some(&ssrc),
                false,
            );
        }
    }

    #[test]
    fn receiver_compound_is_well_formed() {
        let mut rng = RtpRandom::from_seed(9);
        let mut sources = Sources::new(
            SourcesOptions {
                timestamp_unit: 1.0 / 8000.0,
                ..SourcesOptions::default()
            },
            0x1000,
            Inert,
        );

        let now = RtpTime::new(50, 0);
        feed(&mut sources, 0x2000, &[7, 8, 9], now);

        let rtp = RtpBuilder::new(1400, Some(0x1000), &mut rng);
        let mut builder = RtcpBuilder::new(options());
        let compound = builder.build_next(&mut sources, &rtp, false, now).unwrap();

        assert!(compound.validate().is_ok());
        match &compound.0[0] {
            RtcpPacket::ReceiverReport(rr) => {
                assert_eq!(rr.ssrc, 0x1000);
                assert_eq!(rr.reports.len(), 1);
                assert_eq!(rr.reports[0].ssrc, 0x2000);
            }
            other => panic!("expected receiver report, got {:?}", other),
        }
    }

    #[test]
    fn sender_compound_carries_counts() {
        let mut rng = RtpRandom::from_seed(10);
        let mut sources = Sources::new(SourcesOptions::default(), 0x1000, Inert);

        let now = RtpTime::new(50, 0);
        let mut rtp = RtpBuilder::new(1400, Some(0x1000), &mut rng);
        rtp.build(b"0123456789", 0, false, 160, None, now).unwrap();

        let mut builder = RtcpBuilder::new(options());
        let compound = builder.build_next(&mut sources, &rtp, true, now).unwrap();

        match &compound.0[0] {
            RtcpPacket::SenderReport(sr) => {
                assert_eq!(sr.packet_count, 1);
                assert_eq!(sr.octet_count, 10);
            }
            other => panic!("expected sender report, got {:?}", other),
        }
    }

    #[test]
    fn sdes_interval_gates_optional_items() {
        let mut rng = RtpRandom::from_seed(11);
        let mut sources = Sources::new(SourcesOptions::default(), 0x1000, Inert);
        let rtp = RtpBuilder::new(1400, Some(0x1000), &mut rng);

        let mut builder = RtcpBuilder::new(options());
        builder
            .set_local_item(SdesItemType::Name, b"panda")
            .unwrap();
        builder.set_interval(SdesItemType::Name, 3);

        let now = RtpTime::new(50, 0);
        let mut with_name = 0;
        for _ in 0..6 {
            let compound = builder.build_next(&mut sources, &rtp, false, now).unwrap();
            if let RtcpPacket::SourceDescription(sdes) = &compound.0[1] {
                if sdes.chunks[0]
                    .items
                    .iter()
                    .any(|it| it.kind == SdesItemType::Name)
                {
                    with_name += 1;
                }
            }
        }

        assert_eq!(with_name, 2);
    }

    #[test]
    fn bye_compound_ends_with_goodbye() {
        let mut rng = RtpRandom::from_seed(12);
        let rtp = RtpBuilder::new(1400, Some(0x1000), &mut rng);
        let mut builder = RtcpBuilder::new(options());

        let compound = builder
            .build_bye(0x1000, &rtp, false, RtpTime::new(50, 0), b"leaving")
            .unwrap();

        assert!(compound.validate().is_ok());
        match compound.0.last() {
            Some(RtcpPacket::Goodbye(bye)) => {
                assert_eq!(bye.sources, vec![0x1000]);
                assert_eq!(&bye.reason[..], b"leaving");
            }
            other => panic!("expected goodbye, got {:?}", other),
        }
    }
}
