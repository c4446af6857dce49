use codec::time::RtpTime;

/// Ceiling on a forward sequence jump that is still treated as loss
/// rather than a restarted stream.
pub const MAX_DROPOUT: u16 = 3000;

/// Window of backwards sequence numbers accepted as reordering.
pub const MAX_MISORDER: u16 = 100;

/// Consecutive in-order packets a new source has to produce before it
/// is believed.
pub const MIN_SEQUENTIAL: u32 = 2;

const SEQ_MOD: u32 = 1 << 16;

/// Outcome of feeding one sequence number into the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    /// Counted and the statistics were updated.
    Valid,
    /// The source just left probation; the packet is valid.
    Promoted,
    /// Still on probation; the packet is not yet trusted.
    Probation,
    /// Large jump or failed probation step, packet dropped.
    Invalid,
}

/// Per-source RTP sequence number state, following the validation
/// algorithm of RFC 3550 appendix A.1.
#[derive(Debug, Clone)]
pub struct SequenceState {
    base_seq: u16,
    max_seq: u16,
    /// Count of sequence number wrap-arounds.
    cycles: u32,
    bad_seq: u32,
    probation: u32,
    min_sequential: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
}

impl SequenceState {
    /// State for a source first heard with sequence number `seq`.
    ///
    /// With `min_sequential` zero the source is trusted right away and
    /// the creating packet counts; otherwise `seq` is re-fed through
    /// [`SequenceState::update`] by the caller as the first probation
    /// step.
    pub fn new(seq: u16, min_sequential: u32) -> Self {
        let mut state = Self {
            base_seq: seq,
            max_seq: seq,
            cycles: 0,
            bad_seq: SEQ_MOD + 1,
            probation: min_sequential,
            min_sequential,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
        };

        if min_sequential == 0 {
            state.received = 1;
        } else {
            state.max_seq = seq.wrapping_sub(1);
        }

        state
    }

    fn reset(&mut self, seq: u16) {
        self.base_seq = seq;
        self.max_seq = seq;
        self.bad_seq = SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
        self.received_prior = 0;
        self.expected_prior = 0;
    }

    pub fn on_probation(&self) -> bool {
        self.probation > 0
    }

    /// Feed one received sequence number through the validator.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session_service::sources::stats::{SeqStatus, SequenceState};
    ///
    /// let mut state = SequenceState::new(65530, 2);
    /// assert_eq!(state.update(65530), SeqStatus::Probation);
    /// assert_eq!(state.update(65531), SeqStatus::Promoted);
    ///
    /// for seq in [65532u16, 0, 1, 2] {
    ///     assert_eq!(state.update(seq), SeqStatus::Valid);
    /// }
    ///
    /// // the wrap from 0xffff bumped the cycle count exactly once
    /// assert_eq!(state.extended_highest(), 65538);
    /// ```
    pub fn update(&mut self, seq: u16) -> SeqStatus {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            // The source is not valid until MIN_SEQUENTIAL packets with
            // sequential sequence numbers have been received.
            return if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.reset(seq);
                    self.received = 1;
                    SeqStatus::Promoted
                } else {
                    SeqStatus::Probation
                }
            } else {
                self.probation = self.min_sequential.saturating_sub(1).max(1);
                self.max_seq = seq;
                SeqStatus::Probation
            };
        }

        if (udelta as u32) < MAX_DROPOUT as u32 {
            // in order, with permissible gap
            if seq < self.max_seq {
                self.cycles += 1;
            }

            self.max_seq = seq;
        } else if udelta as u32 <= SEQ_MOD - MAX_MISORDER as u32 {
            // the sequence number made a very large jump
            if seq as u32 == self.bad_seq {
                // Two sequential packets: assume the other side
                // restarted without telling us, re-sync on it.
                self.reset(seq);
            } else {
                self.bad_seq = (seq as u32 + 1) & (SEQ_MOD - 1);
                return SeqStatus::Invalid;
            }
        } else {
            // duplicate or reordered packet, counted but max_seq stays
        }

        self.received = self.received.wrapping_add(1);
        SeqStatus::Valid
    }

    pub fn extended_highest(&self) -> u32 {
        (self.cycles << 16) | self.max_seq as u32
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn max_seq(&self) -> u16 {
        self.max_seq
    }

    pub fn packets_received(&self) -> u32 {
        self.received
    }

    /// Packets the sequence numbers say we should have seen so far.
    pub fn expected(&self) -> u32 {
        self.extended_highest()
            .wrapping_sub(self.base_seq as u32)
            .wrapping_add(1)
    }

    /// Cumulative loss, clamped into the signed 24-bit range report
    /// blocks can carry.
    pub fn cumulative_lost(&self) -> i32 {
        let lost = self.expected() as i64 - self.received as i64;
        lost.clamp(-0x0080_0000, 0x007f_ffff) as i32
    }

    /// Loss fraction over the interval since the previous call, as the
    /// 8-bit fixed point number of report blocks.  Advances the
    /// interval snapshot.
    pub fn fraction_lost(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64) as u8
        }
    }
}

/// Interarrival jitter estimate of RFC 3550 appendix A.8, kept as a
/// running floating point value and truncated into timestamp units
/// when a report block is built.
#[derive(Debug, Default, Clone)]
pub struct JitterState {
    transit: f64,
    jitter: f64,
    primed: bool,
}

impl JitterState {
    /// Fold in one packet arrival.  `timestamp_unit` is the duration
    /// of one RTP clock tick in seconds.
    pub fn update(&mut self, arrival: RtpTime, rtp_timestamp: u32, timestamp_unit: f64) {
        if timestamp_unit <= 0.0 {
            return;
        }

        let transit = arrival.as_secs_f64() / timestamp_unit - rtp_timestamp as f64;
        if !self.primed {
            self.primed = true;
            self.transit = transit;
            return;
        }

        let d = (transit - self.transit).abs();
        self.transit = transit;
        self.jitter += (d - self.jitter) / 16.0;
    }

    pub fn jitter_units(&self) -> u32 {
        if self.jitter < 0.0 {
            0
        } else {
            self.jitter as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probation_resets_on_gap() {
        let mut state = SequenceState::new(100, 2);
        assert_eq!(state.update(100), SeqStatus::Probation);
        // one short of promotion, then a gap
        assert_eq!(state.update(105), SeqStatus::Probation);
        assert_eq!(state.update(106), SeqStatus::Promoted);
    }

    #[test]
    fn large_jump_is_dropped_until_confirmed() {
        let mut state = SequenceState::new(10, 0);
        assert_eq!(state.update(11), SeqStatus::Valid);

        // a 5000 packet jump is dropped once
        assert_eq!(state.update(5011), SeqStatus::Invalid);
        // but the consecutive packet after it re-syncs the state
        assert_eq!(state.update(5012), SeqStatus::Valid);
        assert_eq!(state.extended_highest(), 5012);
        assert_eq!(state.packets_received(), 1);
    }

    #[test]
    fn reordered_packet_counts_without_advancing() {
        let mut state = SequenceState::new(50, 0);
        assert_eq!(state.update(51), SeqStatus::Valid);
        assert_eq!(state.update(52), SeqStatus::Valid);
        assert_eq!(state.update(50), SeqStatus::Valid);
        assert_eq!(state.extended_highest(), 52);
        assert_eq!(state.packets_received(), 4);
    }

    #[test]
    fn steady_arrivals_keep_jitter_near_zero() {
        let mut jitter = JitterState::default();
        let unit = 1.0 / 8000.0;

        // packets every 20 ms carrying exactly 160 ticks each
        for i in 0..100u32 {
            let arrival = RtpTime::new(0, (i as u64) * 20_000);
            jitter.update(arrival, i * 160, unit);
        }

        assert_eq!(jitter.jitter_units(), 0);
    }

    #[test]
    fn late_packets_raise_the_estimate() {
        let mut jitter = JitterState::default();
        let unit = 1.0 / 8000.0;

        // every other packet shows up 5 ms late
        for i in 0..100u32 {
            let skew = if i % 2 == 0 { 0 } else { 5_000 };
            let arrival = RtpTime::new(0, (i as u64) * 20_000 + skew);
            jitter.update(arrival, i * 160, unit);
        }

        // 5 ms is 40 ticks of transit variation
        assert!(jitter.jitter_units() > 10);
        assert!(jitter.jitter_units() <= 40);
    }

    #[test]
    fn fraction_lost_tracks_interval() {
        let mut state = SequenceState::new(0, 0);
        for seq in 1..=7u16 {
            if seq != 4 {
                state.update(seq);
            }
        }

        // 8 expected, 7 received: one of eight lost
        assert_eq!(state.fraction_lost(), 256 / 8);
        // no further loss in the next interval
        state.update(8);
        assert_eq!(state.fraction_lost(), 0);
    }
}
