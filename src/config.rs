use serde::{Deserialize, Serialize};
use service::sources::ProbationType;

use crate::{error::Error, transport::ReceiveMode};

/// Timeout multipliers, all applied to the deterministic RTCP
/// interval at sweep time.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct Timeouts {
    ///
    /// Sender status expires after this many intervals without RTP.
    ///
    #[serde(default = "Timeouts::sender")]
    pub sender: f64,
    ///
    /// A silent member is removed after this many intervals.
    ///
    #[serde(default = "Timeouts::member")]
    pub member: f64,
    ///
    /// A member that sent BYE lingers this long for late reports.
    ///
    #[serde(default = "Timeouts::bye")]
    pub bye: f64,
    ///
    /// A remembered collision address is forgotten after this long.
    ///
    #[serde(default = "Timeouts::collision")]
    pub collision: f64,
    ///
    /// A received SDES NOTE item is cleared after this long.
    ///
    #[serde(default = "Timeouts::note")]
    pub note: f64,
}

impl Timeouts {
    fn sender() -> f64 {
        2.0
    }

    fn member() -> f64 {
        5.0
    }

    fn bye() -> f64 {
        1.0
    }

    fn collision() -> f64 {
        10.0
    }

    fn note() -> f64 {
        25.0
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sender: Self::sender(),
            member: Self::member(),
            bye: Self::bye(),
            collision: Self::collision(),
            note: Self::note(),
        }
    }
}

/// How often each optional SDES item rides along in a compound,
/// counted in compound packets; zero disables the item.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct SdesItemIntervals {
    #[serde(default)]
    pub name: u32,
    #[serde(default)]
    pub email: u32,
    #[serde(default)]
    pub phone: u32,
    #[serde(default)]
    pub location: u32,
    #[serde(default)]
    pub tool: u32,
    #[serde(default)]
    pub note: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    ///
    /// Duration of one RTP clock tick in seconds, e.g. 1/8000 for
    /// telephone audio.  This is the one parameter with no sensible
    /// default; jitter and sender report timestamps derive from it.
    ///
    pub timestamp_unit: f64,
    ///
    /// Upper bound for outgoing RTP packets and RTCP compounds alike.
    ///
    #[serde(default = "SessionConfig::max_packet_size")]
    pub max_packet_size: usize,
    ///
    /// Session bandwidth estimate in bytes per second; the RTCP
    /// budget is a fraction of it.
    ///
    #[serde(default = "SessionConfig::session_bandwidth")]
    pub session_bandwidth: f64,
    ///
    /// Fraction of the session bandwidth spent on RTCP.
    ///
    #[serde(default = "SessionConfig::rtcp_fraction")]
    pub rtcp_fraction: f64,
    ///
    /// Fraction of the RTCP bandwidth reserved for active senders.
    ///
    #[serde(default = "SessionConfig::sender_fraction")]
    pub sender_fraction: f64,
    ///
    /// Lower bound on the RTCP interval, in seconds.
    ///
    #[serde(default = "SessionConfig::min_rtcp_interval")]
    pub min_rtcp_interval: f64,
    ///
    /// Halve the minimum interval before our first RTCP packet, so we
    /// announce ourselves quickly after joining.
    ///
    #[serde(default = "SessionConfig::use_half_at_startup")]
    pub use_half_at_startup: bool,
    ///
    /// Send our BYE immediately instead of scheduling it when the
    /// session is small.
    ///
    #[serde(default = "SessionConfig::request_immediate_bye")]
    pub request_immediate_bye: bool,
    ///
    /// Deliver packets looped back from our own transmitter.
    ///
    #[serde(default)]
    pub accept_own_packets: bool,
    ///
    /// Force the initial SSRC instead of drawing a random one.
    ///
    #[serde(default)]
    pub predefined_ssrc: Option<u32>,
    #[serde(default)]
    pub probation_type: ProbationType,
    #[serde(default)]
    pub receive_mode: ReceiveMode,
    ///
    /// Canonical name sent in every SDES packet.  Synthesized as
    /// "user@host" from the environment when unset.
    ///
    #[serde(default)]
    pub cname: Option<String>,
    ///
    /// Run the poll loop on an internal task instead of requiring the
    /// application to call `poll` itself.
    ///
    #[serde(default)]
    pub use_internal_poll_thread: bool,
    ///
    /// Delay between sampling media and handing it to `send_packet`,
    /// folded into sender report timestamps.
    ///
    #[serde(default)]
    pub pre_transmission_delay: f64,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub sdes_intervals: SdesItemIntervals,
}

impl SessionConfig {
    /// A config with everything defaulted except the timestamp unit.
    pub fn new(timestamp_unit: f64) -> Self {
        Self {
            timestamp_unit,
            max_packet_size: Self::max_packet_size(),
            session_bandwidth: Self::session_bandwidth(),
            rtcp_fraction: Self::rtcp_fraction(),
            sender_fraction: Self::sender_fraction(),
            min_rtcp_interval: Self::min_rtcp_interval(),
            use_half_at_startup: Self::use_half_at_startup(),
            request_immediate_bye: Self::request_immediate_bye(),
            accept_own_packets: false,
            predefined_ssrc: None,
            probation_type: ProbationType::default(),
            receive_mode: ReceiveMode::default(),
            cname: None,
            use_internal_poll_thread: false,
            pre_transmission_delay: 0.0,
            timeouts: Timeouts::default(),
            sdes_intervals: SdesItemIntervals::default(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.timestamp_unit <= 0.0 {
            return Err(Error::InvalidConfig("timestamp unit must be positive"));
        }

        if self.max_packet_size < 64 {
            return Err(Error::InvalidConfig("maximum packet size below 64"));
        }

        if self.session_bandwidth <= 0.0 {
            return Err(Error::InvalidConfig("session bandwidth must be positive"));
        }

        if !(0.0..=1.0).contains(&self.rtcp_fraction)
            || !(0.0..=1.0).contains(&self.sender_fraction)
        {
            return Err(Error::InvalidConfig("fractions live in [0, 1]"));
        }

        if self.min_rtcp_interval < 0.0 {
            return Err(Error::InvalidConfig("negative minimum rtcp interval"));
        }

        Ok(())
    }

    /// The CNAME actually used: the configured one, or "user@host"
    /// from the environment.
    pub fn resolved_cname(&self) -> String {
        if let Some(it) = &self.cname {
            return it.clone();
        }

        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{user}@{host}")
    }

    fn max_packet_size() -> usize {
        65535
    }

    fn session_bandwidth() -> f64 {
        10000.0
    }

    fn rtcp_fraction() -> f64 {
        0.05
    }

    fn sender_fraction() -> f64 {
        0.25
    }

    fn min_rtcp_interval() -> f64 {
        5.0
    }

    fn use_half_at_startup() -> bool {
        true
    }

    fn request_immediate_bye() -> bool {
        true
    }
}
