pub mod external;
pub mod tcp;
pub mod udp;

use bytes::{Bytes, BytesMut};
use codec::time::RtpTime;

use crate::error::{Error, IoEvent};

pub use self::{
    external::{ExternalParams, ExternalTransmitter},
    tcp::{TcpParams, TcpTransmitter},
    udp::{UdpParams, UdpTransmitter},
};

/// A transport-level peer address.
///
/// The session never looks inside an address; it only compares them,
/// so one enum covers datagram peers, framed stream peers and the
/// opaque byte addresses an external transmitter may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpAddress {
    Udp(std::net::SocketAddr),
    /// Peer address of a framed TCP connection.
    Tcp(std::net::SocketAddr),
    /// Whatever an externally-injected transport uses to name a peer.
    Raw(Bytes),
}

impl RtpAddress {
    /// Same participant host, ports ignored.  Raw addresses have no
    /// host notion and compare whole.
    pub fn same_host(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Udp(a), Self::Udp(b))
            | (Self::Tcp(a), Self::Tcp(b))
            | (Self::Udp(a), Self::Tcp(b))
            | (Self::Tcp(a), Self::Udp(b)) => a.ip() == b.ip(),
            (Self::Raw(a), Self::Raw(b)) => a == b,
            _ => false,
        }
    }
}

/// One received datagram (or framed stream payload), tagged with its
/// origin, arrival time and channel.
#[derive(Debug)]
pub struct RawPacket {
    pub data: BytesMut,
    pub addr: Option<RtpAddress>,
    pub receive_time: RtpTime,
    pub is_rtcp: bool,
}

/// Filter policy applied to incoming packets by origin address.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReceiveMode {
    #[default]
    AcceptAll,
    /// Only packets from addresses on the accept list pass.
    AcceptList,
    /// Packets from addresses on the ignore list are dropped.
    IgnoreList,
}

/// The accept/ignore bookkeeping shared by all transmitter kinds.
#[derive(Debug, Default)]
pub struct ReceiveFilter {
    mode: ReceiveMode,
    accept: Vec<RtpAddress>,
    ignore: Vec<RtpAddress>,
}

impl ReceiveFilter {
    pub fn set_mode(&mut self, mode: ReceiveMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    pub fn add_to_accept_list(&mut self, addr: RtpAddress) {
        if !self.accept.contains(&addr) {
            self.accept.push(addr);
        }
    }

    pub fn delete_from_accept_list(&mut self, addr: &RtpAddress) {
        self.accept.retain(|it| it != addr);
    }

    pub fn clear_accept_list(&mut self) {
        self.accept.clear();
    }

    pub fn add_to_ignore_list(&mut self, addr: RtpAddress) {
        if !self.ignore.contains(&addr) {
            self.ignore.push(addr);
        }
    }

    pub fn delete_from_ignore_list(&mut self, addr: &RtpAddress) {
        self.ignore.retain(|it| it != addr);
    }

    pub fn clear_ignore_list(&mut self) {
        self.ignore.clear();
    }

    pub fn allows(&self, addr: &RtpAddress) -> bool {
        match self.mode {
            ReceiveMode::AcceptAll => true,
            ReceiveMode::AcceptList => self.accept.contains(addr),
            ReceiveMode::IgnoreList => !self.ignore.contains(addr),
        }
    }
}

/// Which transport a session runs over, with its parameters.
pub enum TransmitterParams {
    Udp(UdpParams),
    Tcp(TcpParams),
    External(ExternalParams),
}

/// The transmitter of a session: one of the concrete transports behind
/// a uniform operation set.
///
/// Dispatch is a tagged variant, not a trait object; each kind keeps
/// its sockets and queues behind `&self` interior mutability so waits
/// never block unrelated operations.
pub enum Transmitter {
    Udp(UdpTransmitter),
    Tcp(TcpTransmitter),
    External(ExternalTransmitter),
}

impl Transmitter {
    pub async fn send_rtp(&self, data: &[u8]) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.send(data, false).await,
            Self::Tcp(it) => it.send(data).await,
            Self::External(it) => it.send(data, false),
        }
    }

    pub async fn send_rtcp(&self, data: &[u8]) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.send(data, true).await,
            Self::Tcp(it) => it.send(data).await,
            Self::External(it) => it.send(data, true),
        }
    }

    /// Drain ready data from the underlying sockets into the internal
    /// packet queue.  Never blocks.
    pub fn poll(&self) {
        match self {
            Self::Udp(it) => it.poll(),
            // stream readers and external injection fill the queue
            // from their own tasks
            Self::Tcp(_) | Self::External(_) => {}
        }
    }

    pub fn get_next_packet(&self) -> Option<RawPacket> {
        match self {
            Self::Udp(it) => it.get_next_packet(),
            Self::Tcp(it) => it.get_next_packet(),
            Self::External(it) => it.get_next_packet(),
        }
    }

    /// Block until data is available, up to `delay`.  Returns true
    /// when data arrived, false on timeout or abort.
    pub async fn wait_for_incoming_data(&self, delay: RtpTime) -> bool {
        match self {
            Self::Udp(it) => it.wait_for_incoming_data(delay).await,
            Self::Tcp(it) => it.wait_for_incoming_data(delay).await,
            Self::External(it) => it.wait_for_incoming_data(delay).await,
        }
    }

    /// Wake the current or next `wait_for_incoming_data`; callable
    /// from any thread.
    pub fn abort_wait(&self) {
        match self {
            Self::Udp(it) => it.abort_wait(),
            Self::Tcp(it) => it.abort_wait(),
            Self::External(it) => it.abort_wait(),
        }
    }

    /// Drop a pending abort that no wait consumed yet.
    pub fn clear_abort(&self) {
        match self {
            Self::Udp(it) => it.clear_abort(),
            Self::Tcp(it) => it.clear_abort(),
            Self::External(it) => it.clear_abort(),
        }
    }

    pub fn add_destination(&self, addr: RtpAddress) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.add_destination(addr),
            Self::Tcp(_) => Err(Error::Unsupported(
                "stream destinations are added as connected sockets",
            )),
            Self::External(_) => Err(Error::Unsupported(
                "external transmitters manage their own destinations",
            )),
        }
    }

    pub fn delete_destination(&self, addr: &RtpAddress) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.delete_destination(addr),
            Self::Tcp(it) => it.delete_destination(addr),
            Self::External(_) => Err(Error::Unsupported(
                "external transmitters manage their own destinations",
            )),
        }
    }

    pub fn clear_destinations(&self) {
        match self {
            Self::Udp(it) => it.clear_destinations(),
            Self::Tcp(it) => it.clear_destinations(),
            Self::External(_) => {}
        }
    }

    pub fn set_receive_mode(&self, mode: ReceiveMode) {
        self.with_filter(|filter| filter.set_mode(mode));
    }

    pub fn with_filter<R>(&self, f: impl FnOnce(&mut ReceiveFilter) -> R) -> R {
        match self {
            Self::Udp(it) => it.with_filter(f),
            Self::Tcp(it) => it.with_filter(f),
            Self::External(it) => it.with_filter(f),
        }
    }

    pub fn join_multicast_group(&self, group: std::net::IpAddr) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.join_multicast_group(group),
            _ => Err(Error::Unsupported("multicast needs a datagram transport")),
        }
    }

    pub fn leave_multicast_group(&self, group: std::net::IpAddr) -> Result<(), Error> {
        match self {
            Self::Udp(it) => it.leave_multicast_group(group),
            _ => Err(Error::Unsupported("multicast needs a datagram transport")),
        }
    }

    pub fn leave_all_multicast_groups(&self) {
        if let Self::Udp(it) = self {
            it.leave_all_multicast_groups();
        }
    }

    /// True when `addr` is one of our own local bindings, which makes
    /// an incoming packet a loopback of our own traffic.
    pub fn comes_from_this_transmitter(&self, addr: &RtpAddress) -> bool {
        match self {
            Self::Udp(it) => it.comes_from_this_transmitter(addr),
            Self::Tcp(_) => false,
            Self::External(it) => it.comes_from_this_transmitter(addr),
        }
    }

    /// The local (rtp, rtcp) port pair, for transports that have one.
    pub fn local_ports(&self) -> Option<(u16, u16)> {
        match self {
            Self::Udp(it) => Some((it.rtp_port(), it.rtcp_port())),
            Self::Tcp(_) | Self::External(_) => None,
        }
    }

    /// Bytes each packet costs below us (L3 + L4 headers), an input of
    /// the scheduler's bandwidth arithmetic.
    pub fn header_overhead(&self) -> usize {
        match self {
            Self::Udp(it) => it.header_overhead(),
            // IPv4 + TCP without options
            Self::Tcp(_) => 40,
            Self::External(it) => it.header_overhead(),
        }
    }

    /// Connection-level errors collected since the last call; stream
    /// destinations they refer to are already removed.
    pub fn take_io_events(&self) -> Vec<IoEvent> {
        match self {
            Self::Tcp(it) => it.take_io_events(),
            Self::Udp(_) | Self::External(_) => Vec::new(),
        }
    }

    /// Release sockets and wake pending waiters.
    pub async fn destroy(&self) {
        self.abort_wait();
        if let Self::Tcp(it) = self {
            it.close_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp(addr: &str) -> RtpAddress {
        RtpAddress::Udp(addr.parse().unwrap())
    }

    #[test]
    fn same_host_ignores_ports_and_kinds() {
        assert!(udp("10.0.0.1:5000").same_host(&udp("10.0.0.1:6000")));
        assert!(!udp("10.0.0.1:5000").same_host(&udp("10.0.0.2:5000")));

        let stream = RtpAddress::Tcp("10.0.0.1:7000".parse().unwrap());
        assert!(udp("10.0.0.1:5000").same_host(&stream));

        let raw = RtpAddress::Raw(Bytes::from_static(b"peer"));
        assert!(raw.same_host(&RtpAddress::Raw(Bytes::from_static(b"peer"))));
        assert!(!raw.same_host(&udp("10.0.0.1:5000")));
    }

    #[test]
    fn accept_list_only_passes_listed_addresses() {
        let mut filter = ReceiveFilter::default();
        filter.set_mode(ReceiveMode::AcceptList);
        filter.add_to_accept_list(udp("10.0.0.1:5000"));

        assert!(filter.allows(&udp("10.0.0.1:5000")));
        assert!(!filter.allows(&udp("10.0.0.1:5002")));

        filter.delete_from_accept_list(&udp("10.0.0.1:5000"));
        assert!(!filter.allows(&udp("10.0.0.1:5000")));
    }

    #[test]
    fn ignore_list_drops_listed_addresses() {
        let mut filter = ReceiveFilter::default();
        filter.set_mode(ReceiveMode::IgnoreList);
        filter.add_to_ignore_list(udp("10.0.0.1:5000"));

        assert!(!filter.allows(&udp("10.0.0.1:5000")));
        assert!(filter.allows(&udp("10.0.0.9:5000")));

        filter.clear_ignore_list();
        assert!(filter.allows(&udp("10.0.0.1:5000")));
    }
}
