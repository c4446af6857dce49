use std::{
    process,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

static UNIQUE: AtomicU64 = AtomicU64::new(0);

/// Random source for SSRC identifiers, initial sequence numbers and
/// the scheduler's interval draws.
///
/// Seeded from the process id, the current wallclock and an in-process
/// counter so that two sessions created in the same microsecond still
/// diverge.  Not suitable for cryptographic use.
pub struct RtpRandom {
    rng: StdRng,
}

impl RtpRandom {
    pub fn new() -> Self {
        let clock = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        let unique = UNIQUE.fetch_add(1, Ordering::Relaxed);
        Self::from_seed(clock ^ ((process::id() as u64) << 32) ^ unique.rotate_left(17))
    }

    /// Deterministic generator, for tests.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_u8(&mut self) -> u8 {
        self.rng.random()
    }

    pub fn random_u16(&mut self) -> u16 {
        self.rng.random()
    }

    pub fn random_u32(&mut self) -> u32 {
        self.rng.random()
    }

    /// Uniform draw from `[0, 1)`.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session_service::random::RtpRandom;
    ///
    /// let mut random = RtpRandom::from_seed(7);
    /// for _ in 0..1000 {
    ///     let value = random.random_f64();
    ///     assert!((0.0..1.0).contains(&value));
    /// }
    /// ```
    pub fn random_f64(&mut self) -> f64 {
        self.rng.random()
    }
}

impl Default for RtpRandom {
    fn default() -> Self {
        Self::new()
    }
}
