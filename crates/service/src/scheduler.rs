use codec::time::RtpTime;

use crate::{GroupState, random::RtpRandom};

/// Compensation factor so that the expectation of the randomized
/// interval equals the deterministic one (e minus 3/2).
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Fallback for the very first average before any control packet has
/// been seen, per RFC 3550 section 6.3.2.
const INITIAL_AVG_SIZE: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Total session bandwidth in bytes per second.
    pub session_bandwidth: f64,
    /// Fraction of the session bandwidth given to RTCP, normally 5%.
    pub rtcp_fraction: f64,
    /// Fraction of the RTCP bandwidth reserved for active senders,
    /// normally 25%.
    pub sender_fraction: f64,
    /// Lower bound on the deterministic interval, in seconds.
    pub min_interval: f64,
    /// Use half the minimum interval before the first transmission so
    /// a joining participant announces itself quickly.
    pub use_half_at_startup: bool,
    /// Transport bytes per packet below RTCP (IP + UDP headers), added
    /// to every observed compound size.
    pub header_overhead: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            session_bandwidth: 10000.0,
            rtcp_fraction: 0.05,
            sender_fraction: 0.25,
            min_interval: 5.0,
            use_half_at_startup: true,
            header_overhead: 28,
        }
    }
}

/// The RTCP transmission scheduler of RFC 3550 section 6.3.
///
/// Decides *when* the next compound packet leaves, applying the
/// randomized interval computation, timer reconsideration on each
/// tick, reverse reconsideration when the group shrinks, and the BYE
/// backoff for large sessions.
pub struct RtcpScheduler {
    options: SchedulerOptions,
    /// Last transmission instant.
    tp: RtpTime,
    /// Next scheduled transmission instant.
    tn: RtpTime,
    /// The member estimate when `tn` was last computed.
    pmembers: usize,
    avg_rtcp_size: f64,
    initial: bool,
    first_call: bool,
    bye_scheduled: bool,
    /// Set when a small-session BYE skips the schedule and goes out on
    /// the next tick.
    immediate: bool,
}

impl RtcpScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            tp: RtpTime::default(),
            tn: RtpTime::default(),
            pmembers: 1,
            avg_rtcp_size: INITIAL_AVG_SIZE,
            initial: true,
            first_call: true,
            bye_scheduled: false,
            immediate: false,
        }
    }

    pub fn options_mut(&mut self) -> &mut SchedulerOptions {
        &mut self.options
    }

    pub fn pmembers(&self) -> usize {
        self.pmembers
    }

    pub fn next_transmission(&self) -> RtpTime {
        self.tn
    }

    /// Fold an observed compound packet (sent or received) into the
    /// smoothed average size estimate.
    pub fn analyse(&mut self, compound_size: usize) {
        let size = (compound_size + self.options.header_overhead) as f64;
        self.avg_rtcp_size = size / 16.0 + self.avg_rtcp_size * (15.0 / 16.0);
    }

    /// The deterministic calculated interval `Td` in seconds.
    ///
    /// A degenerate configuration (tiny average size against a huge
    /// bandwidth) can push `n * C` towards zero; the minimum interval
    /// clamp keeps the result sane.
    pub fn deterministic_interval(&self, group: &GroupState) -> f64 {
        let rtcp_bw = self.options.session_bandwidth * self.options.rtcp_fraction;

        let mut n = group.members.max(1);
        let mut c = self.avg_rtcp_size / rtcp_bw;

        // Senders get their own slice of the bandwidth as long as they
        // are less than a quarter of the group.
        if group.senders > 0 && (group.senders as f64) < 0.25 * group.members as f64 {
            if group.we_sent {
                c = self.avg_rtcp_size / (self.options.sender_fraction * rtcp_bw);
                n = group.senders;
            } else {
                c = self.avg_rtcp_size / ((1.0 - self.options.sender_fraction) * rtcp_bw);
                n = group.members - group.senders;
            }
        }

        let min_interval = if self.initial && self.options.use_half_at_startup && !self.bye_scheduled
        {
            self.options.min_interval / 2.0
        } else {
            self.options.min_interval
        };

        f64::max(min_interval, n as f64 * c)
    }

    /// One draw of the randomized interval `T`.
    fn randomized_interval(&self, group: &GroupState, rng: &mut RtpRandom) -> f64 {
        self.deterministic_interval(group) * (0.5 + rng.random_f64()) / COMPENSATION
    }

    /// The transmission test: returns true exactly when a compound
    /// packet should leave now.
    ///
    /// On the first call the timer is armed; afterwards each tick past
    /// `tn` reconsiders the interval against the current group state
    /// and either fires or pushes `tn` out.
    pub fn is_time(&mut self, now: RtpTime, group: &GroupState, rng: &mut RtpRandom) -> bool {
        if self.first_call {
            self.first_call = false;
            self.tp = now;
            self.pmembers = group.members.max(1);
            self.tn = now + RtpTime::from_secs_f64(self.randomized_interval(group, rng));
            return false;
        }

        if self.immediate {
            self.immediate = false;
            self.bye_scheduled = false;
            self.tp = now;
            self.tn = now + RtpTime::from_secs_f64(self.randomized_interval(group, rng));
            self.pmembers = group.members.max(1);
            return true;
        }

        if now < self.tn {
            return false;
        }

        let interval = RtpTime::from_secs_f64(self.randomized_interval(group, rng));
        if self.tp + interval <= now {
            self.tp = now;
            self.tn = now + interval;
            self.pmembers = group.members.max(1);
            self.initial = false;
            self.bye_scheduled = false;
            true
        } else {
            self.tn = self.tp + interval;
            false
        }
    }

    /// Reverse reconsideration: when the group estimate shrinks the
    /// pending timer is rescaled so the remaining wait reflects the
    /// smaller group.
    ///
    /// # Test
    ///
    /// ```
    /// use codec::time::RtpTime;
    /// use rtp_session_service::scheduler::{RtcpScheduler, SchedulerOptions};
    ///
    /// let mut scheduler = RtcpScheduler::new(SchedulerOptions::default());
    /// scheduler.restore(RtpTime::new(0, 0), RtpTime::new(30, 0), 100);
    ///
    /// scheduler.reconsider_members(RtpTime::new(10, 0), 25);
    /// assert_eq!(scheduler.next_transmission(), RtpTime::new(15, 0));
    /// assert_eq!(scheduler.pmembers(), 25);
    /// ```
    pub fn reconsider_members(&mut self, now: RtpTime, members: usize) {
        if members >= self.pmembers || self.pmembers == 0 {
            return;
        }

        let ratio = members as f64 / self.pmembers as f64;
        let remaining = (self.tn - now).as_secs_f64();
        let elapsed = (now - self.tp).as_secs_f64();

        self.tn = now + RtpTime::from_secs_f64(remaining * ratio);
        self.tp = now - RtpTime::from_secs_f64(elapsed * ratio);
        self.pmembers = members.max(1);
    }

    /// Arm the timer for a queued BYE compound.
    ///
    /// With more than 50 members the backoff algorithm restarts the
    /// schedule over a fresh one-member group so a flood of leaving
    /// participants cannot burst BYE packets; small sessions fire
    /// immediately.  The startup half-interval never applies here.
    pub fn schedule_bye(
        &mut self,
        now: RtpTime,
        compound_size: usize,
        members: usize,
        rng: &mut RtpRandom,
    ) {
        self.first_call = false;
        self.initial = false;
        self.bye_scheduled = true;
        self.avg_rtcp_size = (compound_size + self.options.header_overhead) as f64;

        if members > 50 {
            let group = GroupState {
                members: 1,
                senders: 0,
                we_sent: false,
            };

            self.tp = now;
            self.pmembers = 1;
            self.tn = now + RtpTime::from_secs_f64(self.randomized_interval(&group, rng));
        } else {
            self.immediate = true;
            self.tp = now;
            self.tn = now;
        }
    }

    /// Time left until the next scheduled transmission.
    pub fn transmission_delay(&self, now: RtpTime) -> RtpTime {
        if self.first_call { RtpTime::default() } else { self.tn - now }
    }

    /// Force the timer state, for tests and session restarts.
    pub fn restore(&mut self, tp: RtpTime, tn: RtpTime, pmembers: usize) {
        self.first_call = false;
        self.tp = tp;
        self.tn = tn;
        self.pmembers = pmembers.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(members: usize, senders: usize, we_sent: bool) -> GroupState {
        GroupState {
            members,
            senders,
            we_sent,
        }
    }

    #[test]
    fn randomized_interval_stays_in_bounds() {
        let mut rng = RtpRandom::from_seed(3);
        let scheduler = RtcpScheduler::new(SchedulerOptions {
            use_half_at_startup: false,
            ..SchedulerOptions::default()
        });

        let state = group(10, 0, false);
        let td = scheduler.deterministic_interval(&state);
        let mut sum = 0.0;

        for _ in 0..10_000 {
            let t = scheduler.randomized_interval(&state, &mut rng);
            let ratio = t / td;
            assert!(ratio >= 0.5 / COMPENSATION && ratio <= 1.5 / COMPENSATION);
            sum += t;
        }

        // the mean converges on the deterministic interval
        let mean = sum / 10_000.0;
        assert!((mean / td - 1.0).abs() < 0.02);
    }

    #[test]
    fn half_interval_only_before_first_transmission() {
        let mut rng = RtpRandom::from_seed(4);
        let mut scheduler = RtcpScheduler::new(SchedulerOptions::default());
        let state = group(1, 0, false);

        // 1000 B average over 500 B/s of rtcp bandwidth is 2 s, below
        // the halved minimum of 2.5 s
        assert_eq!(scheduler.deterministic_interval(&state), 2.5);

        // arm, then fire well past the interval
        assert!(!scheduler.is_time(RtpTime::new(0, 0), &state, &mut rng));
        assert!(scheduler.is_time(RtpTime::new(60, 0), &state, &mut rng));
        assert_eq!(scheduler.deterministic_interval(&state), 5.0);
    }

    #[test]
    fn senders_use_their_own_budget() {
        let mut scheduler = RtcpScheduler::new(SchedulerOptions {
            use_half_at_startup: false,
            ..SchedulerOptions::default()
        });

        // force a known average so the arithmetic is visible
        scheduler.avg_rtcp_size = 500.0;

        // 100 members, 10 senders, rtcp bandwidth 500 B/s:
        // sender budget 125 B/s -> 10 * 500/125 = 40 s
        let td = scheduler.deterministic_interval(&group(100, 10, true));
        assert_eq!(td, 40.0);

        // receiver budget 375 B/s -> 90 * 500/375 = 120 s
        let td = scheduler.deterministic_interval(&group(100, 10, false));
        assert!((td - 120.0).abs() < 1e-9);
    }

    #[test]
    fn small_session_bye_fires_immediately() {
        let mut rng = RtpRandom::from_seed(5);
        let mut scheduler = RtcpScheduler::new(SchedulerOptions::default());
        let now = RtpTime::new(100, 0);

        scheduler.schedule_bye(now, 60, 10, &mut rng);
        assert!(scheduler.is_time(now, &group(10, 0, false), &mut rng));
    }

    #[test]
    fn large_session_bye_backs_off() {
        let mut rng = RtpRandom::from_seed(6);
        let mut scheduler = RtcpScheduler::new(SchedulerOptions::default());
        let now = RtpTime::new(100, 0);

        scheduler.schedule_bye(now, 60, 200, &mut rng);
        assert!(!scheduler.is_time(now, &group(200, 0, false), &mut rng));
        assert!(scheduler.next_transmission() > now);
    }
}
