use std::{
    ops::{Add, AddAssign, Sub},
    time::{SystemTime, UNIX_EPOCH},
};

/// Seconds between the NTP epoch (1900-01-01) and the unix epoch
/// (1970-01-01).
pub const NTP_EPOCH_OFFSET: u32 = 2_208_988_800;

const MICROS_PER_SEC: u32 = 1_000_000;

/// A wallclock instant with microsecond resolution.
///
/// The microsecond part is always kept in `[0, 10^6)`; all arithmetic
/// carries overflow into the seconds part and subtraction saturates at
/// zero, so an instant can never go negative.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RtpTime {
    secs: u64,
    micros: u32,
}

impl RtpTime {
    /// # Test
    ///
    /// ```
    /// use rtp_session_codec::time::RtpTime;
    ///
    /// let time = RtpTime::new(1, 2_500_000);
    /// assert_eq!(time.secs(), 3);
    /// assert_eq!(time.micros(), 500_000);
    /// ```
    pub fn new(secs: u64, micros: u64) -> Self {
        Self {
            secs: secs + micros / MICROS_PER_SEC as u64,
            micros: (micros % MICROS_PER_SEC as u64) as u32,
        }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self { secs, micros: 0 }
    }

    /// Current UTC wallclock time.
    ///
    /// Monotonicity within a run is all the callers rely on; the small
    /// jumps a host clock adjustment can introduce are acceptable for
    /// report timestamps.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Self {
            secs: elapsed.as_secs(),
            micros: elapsed.subsec_micros(),
        }
    }

    pub fn from_secs_f64(value: f64) -> Self {
        if value <= 0.0 {
            return Self::default();
        }

        Self {
            secs: value as u64,
            micros: ((value - (value as u64) as f64) * MICROS_PER_SEC as f64) as u32,
        }
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn micros(&self) -> u32 {
        self.micros
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.micros as f64 / MICROS_PER_SEC as f64
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.micros == 0
    }
}

impl Add for RtpTime {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.secs + other.secs,
            self.micros as u64 + other.micros as u64,
        )
    }
}

impl AddAssign for RtpTime {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for RtpTime {
    type Output = Self;

    /// Saturating difference between two instants.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session_codec::time::RtpTime;
    ///
    /// let a = RtpTime::new(2, 250_000);
    /// let b = RtpTime::new(1, 750_000);
    /// assert_eq!(a - b, RtpTime::new(0, 500_000));
    /// assert!((b - a).is_zero());
    /// ```
    fn sub(self, other: Self) -> Self {
        if other >= self {
            return Self::default();
        }

        let (mut secs, mut micros) = (self.secs - other.secs, self.micros as i64);
        micros -= other.micros as i64;
        if micros < 0 {
            micros += MICROS_PER_SEC as i64;
            secs -= 1;
        }

        Self {
            secs,
            micros: micros as u32,
        }
    }
}

/// A 64-bit NTP timestamp: seconds since 1900-01-01 in the most
/// significant word and a binary fraction of a second in the least
/// significant word.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NtpTime {
    pub msw: u32,
    pub lsw: u32,
}

impl NtpTime {
    pub fn new(msw: u32, lsw: u32) -> Self {
        Self { msw, lsw }
    }

    pub fn as_u64(&self) -> u64 {
        ((self.msw as u64) << 32) | self.lsw as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            msw: (value >> 32) as u32,
            lsw: value as u32,
        }
    }

    /// The middle 32 bits, used as the LSR field of reception reports.
    pub fn middle_32(&self) -> u32 {
        (self.msw << 16) | (self.lsw >> 16)
    }
}

impl From<RtpTime> for NtpTime {
    /// # Test
    ///
    /// ```
    /// use rtp_session_codec::time::{NtpTime, RtpTime};
    ///
    /// let ntp = NtpTime::from(RtpTime::new(0, 500_000));
    /// assert_eq!(ntp.msw, 2_208_988_800);
    /// assert_eq!(ntp.lsw, 0x8000_0000);
    /// ```
    fn from(time: RtpTime) -> Self {
        Self {
            msw: (time.secs() as u32).wrapping_add(NTP_EPOCH_OFFSET),
            lsw: (((time.micros() as u64) << 32) / 1_000_000) as u32,
        }
    }
}

impl From<NtpTime> for RtpTime {
    /// Instants before the unix epoch decode as time zero.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session_codec::time::{NtpTime, RtpTime};
    ///
    /// let time = RtpTime::new(1_000_000, 123_456);
    /// let back = RtpTime::from(NtpTime::from(time));
    /// assert_eq!(back.secs(), time.secs());
    /// assert!(back.micros().abs_diff(time.micros()) <= 1);
    ///
    /// assert!(RtpTime::from(NtpTime::new(1900, 0)).is_zero());
    /// ```
    fn from(ntp: NtpTime) -> Self {
        if ntp.msw < NTP_EPOCH_OFFSET {
            return Self::default();
        }

        Self {
            secs: (ntp.msw - NTP_EPOCH_OFFSET) as u64,
            micros: (((ntp.lsw as u64) * 1_000_000) >> 32) as u32,
        }
    }
}
