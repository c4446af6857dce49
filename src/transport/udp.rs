use std::{
    collections::VecDeque,
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use bytes::BytesMut;
use codec::time::RtpTime;
use parking_lot::{Mutex, RwLock};
use tokio::{net::UdpSocket, sync::Notify, time::sleep_until};

use super::{RawPacket, ReceiveFilter, RtpAddress};
use crate::error::Error;

/// IPv4 + UDP headers.
const V4_OVERHEAD: usize = 20 + 8;

/// IPv6 + UDP headers.
const V6_OVERHEAD: usize = 40 + 8;

#[derive(Debug, Clone)]
pub struct UdpParams {
    /// Local address to bind; an unspecified address binds every
    /// interface.
    pub bind_ip: IpAddr,
    /// RTP port; must be even, RTCP takes the next port.  Zero picks
    /// an even port automatically.
    pub portbase: u16,
    /// Carry RTP and RTCP over the single RTP socket, demultiplexed by
    /// payload type.
    pub rtcp_mux: bool,
    /// TTL applied to multicast sends.
    pub multicast_ttl: u32,
}

impl Default for UdpParams {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            portbase: 0,
            rtcp_mux: false,
            multicast_ttl: 1,
        }
    }
}

/// RTP over UDP, IPv4 or IPv6: one socket for data and one for
/// control (or a single muxed socket), a destination set that every
/// send fans out to, and a non-blocking drain into the packet queue.
pub struct UdpTransmitter {
    rtp_socket: UdpSocket,
    rtcp_socket: Option<UdpSocket>,
    rtp_port: u16,
    rtcp_port: u16,
    local_ip: IpAddr,
    max_packet_size: usize,
    /// (rtp, rtcp) peer address pairs.
    destinations: RwLock<Vec<(SocketAddr, SocketAddr)>>,
    filter: Mutex<ReceiveFilter>,
    queue: Mutex<VecDeque<RawPacket>>,
    groups: Mutex<Vec<IpAddr>>,
    abort: Notify,
    abort_flag: AtomicBool,
}

impl UdpTransmitter {
    pub async fn create(params: UdpParams, max_packet_size: usize) -> Result<Self, Error> {
        if params.portbase % 2 != 0 {
            return Err(Error::InvalidConfig("rtp portbase must be even"));
        }

        let (rtp_socket, rtcp_socket) = if params.rtcp_mux {
            let socket = UdpSocket::bind((params.bind_ip, params.portbase)).await?;
            (socket, None)
        } else if params.portbase != 0 {
            let rtp = UdpSocket::bind((params.bind_ip, params.portbase)).await?;
            let rtcp = UdpSocket::bind((params.bind_ip, params.portbase + 1)).await?;
            (rtp, Some(rtcp))
        } else {
            Self::bind_auto(params.bind_ip).await?
        };

        let rtp_port = rtp_socket.local_addr()?.port();
        let rtcp_port = rtcp_socket
            .as_ref()
            .map(|it| it.local_addr())
            .transpose()?
            .map(|it| it.port())
            .unwrap_or(rtp_port);

        if params.multicast_ttl > 0 {
            let _ = rtp_socket.set_multicast_ttl_v4(params.multicast_ttl);
            if let Some(socket) = &rtcp_socket {
                let _ = socket.set_multicast_ttl_v4(params.multicast_ttl);
            }
        }

        Ok(Self {
            rtp_socket,
            rtcp_socket,
            rtp_port,
            rtcp_port,
            local_ip: params.bind_ip,
            max_packet_size,
            destinations: RwLock::new(Vec::new()),
            filter: Mutex::new(ReceiveFilter::default()),
            queue: Mutex::new(VecDeque::new()),
            groups: Mutex::new(Vec::new()),
            abort: Notify::new(),
            abort_flag: AtomicBool::new(false),
        })
    }

    /// Pick an even/odd port pair automatically: bind an ephemeral
    /// port, and when it is odd or its sibling is taken, try again.
    async fn bind_auto(bind_ip: IpAddr) -> Result<(UdpSocket, Option<UdpSocket>), Error> {
        for _ in 0..64 {
            let rtp = UdpSocket::bind((bind_ip, 0)).await?;
            let port = rtp.local_addr()?.port();
            if port % 2 != 0 || port == u16::MAX {
                continue;
            }

            if let Ok(rtcp) = UdpSocket::bind((bind_ip, port + 1)).await {
                return Ok((rtp, Some(rtcp)));
            }
        }

        Err(Error::InvalidConfig("no free even/odd udp port pair"))
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp_port
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtcp_port
    }

    pub async fn send(&self, data: &[u8], rtcp: bool) -> Result<(), Error> {
        if data.len() > self.max_packet_size {
            return Err(Error::PacketTooLarge);
        }

        let destinations = self.destinations.read().clone();
        let socket = if rtcp {
            self.rtcp_socket.as_ref().unwrap_or(&self.rtp_socket)
        } else {
            &self.rtp_socket
        };

        for (rtp_addr, rtcp_addr) in destinations {
            let target = if rtcp { rtcp_addr } else { rtp_addr };
            if let Err(e) = socket.send_to(data, target).await {
                // a reset from a vanished peer is routine for datagrams
                if e.kind() != ErrorKind::ConnectionReset {
                    log::warn!("udp socket send error: addr={:?}, err={:?}", target, e);
                }
            }
        }

        Ok(())
    }

    /// Drain everything currently readable on both sockets.
    pub fn poll(&self) {
        // on a muxed socket the channel is decided per packet
        self.drain_socket(&self.rtp_socket, self.rtcp_socket.as_ref().map(|_| false));
        if let Some(socket) = &self.rtcp_socket {
            self.drain_socket(socket, Some(true));
        }
    }

    fn drain_socket(&self, socket: &UdpSocket, channel: Option<bool>) {
        let mut buf = vec![0u8; self.max_packet_size.max(1500)];
        loop {
            let (size, addr) = match socket.try_recv_from(&mut buf) {
                Ok(it) => it,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    log::warn!("udp socket receive error: {:?}", e);
                    break;
                }
            };

            let addr = RtpAddress::Udp(addr);
            if !self.filter.lock().allows(&addr) {
                continue;
            }

            self.queue.lock().push_back(RawPacket {
                data: BytesMut::from(&buf[..size]),
                addr: Some(addr),
                receive_time: RtpTime::now(),
                is_rtcp: channel.unwrap_or_else(|| codec::muxed_is_rtcp(&buf[..size])),
            });
        }
    }

    pub fn get_next_packet(&self) -> Option<RawPacket> {
        self.queue.lock().pop_front()
    }

    pub async fn wait_for_incoming_data(&self, delay: RtpTime) -> bool {
        if !self.queue.lock().is_empty() {
            return true;
        }

        if self.abort_flag.swap(false, Ordering::SeqCst) {
            return false;
        }

        let deadline = tokio::time::Instant::now()
            + Duration::new(delay.secs(), delay.micros() * 1000);

        loop {
            tokio::select! {
                _ = self.rtp_socket.readable() => return true,
                _ = Self::readable_opt(&self.rtcp_socket) => return true,
                _ = self.abort.notified() => {
                    // a cleared abort leaves a stale permit behind,
                    // treat that as spurious
                    if self.abort_flag.swap(false, Ordering::SeqCst) {
                        return false;
                    }
                }
                _ = sleep_until(deadline) => return false,
            }
        }
    }

    async fn readable_opt(socket: &Option<UdpSocket>) {
        match socket {
            Some(it) => {
                let _ = it.readable().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn abort_wait(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
        self.abort.notify_one();
    }

    pub fn clear_abort(&self) {
        self.abort_flag.store(false, Ordering::SeqCst);
    }

    pub fn add_destination(&self, addr: RtpAddress) -> Result<(), Error> {
        let rtp_addr = match addr {
            RtpAddress::Udp(it) => it,
            _ => return Err(Error::InvalidConfig("udp destination expected")),
        };

        // the control sibling lives one port up, or on the same port
        // when multiplexing
        let rtcp_addr = if self.rtcp_socket.is_some() {
            SocketAddr::new(rtp_addr.ip(), rtp_addr.port().wrapping_add(1))
        } else {
            rtp_addr
        };

        let mut destinations = self.destinations.write();
        if !destinations.iter().any(|(it, _)| *it == rtp_addr) {
            destinations.push((rtp_addr, rtcp_addr));
        }

        Ok(())
    }

    pub fn delete_destination(&self, addr: &RtpAddress) -> Result<(), Error> {
        let rtp_addr = match addr {
            RtpAddress::Udp(it) => *it,
            _ => return Err(Error::InvalidConfig("udp destination expected")),
        };

        self.destinations.write().retain(|(it, _)| *it != rtp_addr);
        Ok(())
    }

    pub fn clear_destinations(&self) {
        self.destinations.write().clear();
    }

    pub fn with_filter<R>(&self, f: impl FnOnce(&mut ReceiveFilter) -> R) -> R {
        f(&mut self.filter.lock())
    }

    pub fn join_multicast_group(&self, group: IpAddr) -> Result<(), Error> {
        match group {
            IpAddr::V4(group) => {
                if !group.is_multicast() {
                    return Err(Error::InvalidConfig("not a multicast group"));
                }

                let interface = match self.local_ip {
                    IpAddr::V4(it) => it,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };

                self.rtp_socket.join_multicast_v4(group, interface)?;
                if let Some(socket) = &self.rtcp_socket {
                    socket.join_multicast_v4(group, interface)?;
                }
            }
            IpAddr::V6(group) => {
                if !group.is_multicast() {
                    return Err(Error::InvalidConfig("not a multicast group"));
                }

                self.rtp_socket.join_multicast_v6(&group, 0)?;
                if let Some(socket) = &self.rtcp_socket {
                    socket.join_multicast_v6(&group, 0)?;
                }
            }
        }

        self.groups.lock().push(group);
        Ok(())
    }

    pub fn leave_multicast_group(&self, group: IpAddr) -> Result<(), Error> {
        match group {
            IpAddr::V4(group) => {
                let interface = match self.local_ip {
                    IpAddr::V4(it) => it,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };

                self.rtp_socket.leave_multicast_v4(group, interface)?;
                if let Some(socket) = &self.rtcp_socket {
                    socket.leave_multicast_v4(group, interface)?;
                }
            }
            IpAddr::V6(group) => {
                self.rtp_socket.leave_multicast_v6(&group, 0)?;
                if let Some(socket) = &self.rtcp_socket {
                    socket.leave_multicast_v6(&group, 0)?;
                }
            }
        }

        self.groups.lock().retain(|it| *it != group);
        Ok(())
    }

    pub fn leave_all_multicast_groups(&self) {
        let groups = std::mem::take(&mut *self.groups.lock());
        for group in groups {
            let _ = self.leave_multicast_group(group);
        }
    }

    pub fn comes_from_this_transmitter(&self, addr: &RtpAddress) -> bool {
        let addr = match addr {
            RtpAddress::Udp(it) => it,
            _ => return false,
        };

        if addr.port() != self.rtp_port && addr.port() != self.rtcp_port {
            return false;
        }

        if self.local_ip.is_unspecified() {
            addr.ip().is_loopback() || is_local_ip(addr.ip())
        } else {
            addr.ip() == self.local_ip
        }
    }

    pub fn header_overhead(&self) -> usize {
        match self.local_ip {
            IpAddr::V4(_) => V4_OVERHEAD,
            IpAddr::V6(_) => V6_OVERHEAD,
        }
    }

    /// TTL hint for multicast sends; applied lazily since plain
    /// unicast sessions never touch it.
    pub fn set_multicast_ttl(&self, ttl: u32) -> Result<(), Error> {
        self.rtp_socket.set_multicast_ttl_v4(ttl)?;
        if let Some(socket) = &self.rtcp_socket {
            socket.set_multicast_ttl_v4(ttl)?;
        }

        Ok(())
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(it) => it == Ipv4Addr::LOCALHOST,
        IpAddr::V6(it) => it == Ipv6Addr::LOCALHOST,
    }
}
