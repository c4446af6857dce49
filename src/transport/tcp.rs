use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use bytes::BytesMut;
use codec::time::RtpTime;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Notify,
    time::sleep_until,
};

use super::{RawPacket, ReceiveFilter, RtpAddress};
use crate::error::{Error, IoEvent, IoEventKind};

#[derive(Debug, Clone)]
pub struct TcpParams {
    /// Largest framed payload accepted from a peer; the 16-bit length
    /// prefix caps it at 65535 anyway.
    pub max_packet_size: usize,
}

impl Default for TcpParams {
    fn default() -> Self {
        Self {
            max_packet_size: 65535,
        }
    }
}

/// State shared between the transmitter and the per-connection reader
/// tasks.
struct Shared {
    queue: Mutex<VecDeque<RawPacket>>,
    filter: Mutex<ReceiveFilter>,
    /// Connections whose read side died; pruned on the next send or
    /// event collection.
    dead: Mutex<Vec<SocketAddr>>,
    data_notify: Notify,
}

/// RTP over a byte stream: each packet rides behind a 2-byte
/// big-endian length prefix, and the channel is recovered from the
/// packet type octet since one stream carries both RTP and RTCP.
///
/// Destinations are established connections handed in by the
/// application; each one gets a reader task that reassembles frames
/// into raw packets.  A connection that fails in either direction is
/// removed and reported.
pub struct TcpTransmitter {
    max_packet_size: usize,
    shared: Arc<Shared>,
    writers: tokio::sync::Mutex<HashMap<SocketAddr, OwnedWriteHalf>>,
    abort: Notify,
    abort_flag: AtomicBool,
}

impl TcpTransmitter {
    pub fn create(params: TcpParams) -> Self {
        Self {
            max_packet_size: params.max_packet_size.min(65535),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                filter: Mutex::new(ReceiveFilter::default()),
                dead: Mutex::new(Vec::new()),
                data_notify: Notify::new(),
            }),
            writers: tokio::sync::Mutex::new(HashMap::new()),
            abort: Notify::new(),
            abort_flag: AtomicBool::new(false),
        }
    }

    /// Register an established connection as a destination and start
    /// reading frames from it.
    pub async fn add_client(&self, stream: TcpStream) -> Result<RtpAddress, Error> {
        let peer = stream.peer_addr()?;

        // real-time data should not sit in Nagle buffers
        if let Err(e) = stream.set_nodelay(true) {
            log::error!("tcp socket set nodelay failed!: addr={}, err={}", peer, e);
        }

        let (reader, writer) = stream.into_split();
        self.writers.lock().await.insert(peer, writer);

        let shared = self.shared.clone();
        let max_packet_size = self.max_packet_size;
        tokio::spawn(async move {
            if let Err(e) = read_frames(reader, peer, &shared, max_packet_size).await {
                log::info!("tcp socket disconnect: addr={:?}, err={:?}", peer, e);
            }

            shared.dead.lock().push(peer);
            shared.data_notify.notify_one();
        });

        log::info!("tcp destination added: addr={:?}", peer);
        Ok(RtpAddress::Tcp(peer))
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.max_packet_size {
            return Err(Error::PacketTooLarge);
        }

        let prefix = (data.len() as u16).to_be_bytes();
        let mut failed = Vec::new();

        {
            let mut writers = self.writers.lock().await;
            for (addr, writer) in writers.iter_mut() {
                let result = async {
                    writer.write_all(&prefix).await?;
                    writer.write_all(data).await
                }
                .await;

                if let Err(e) = result {
                    log::warn!("tcp socket send error: addr={:?}, err={:?}", addr, e);
                    failed.push(*addr);
                }
            }

            for addr in &failed {
                writers.remove(addr);
            }
        }

        if !failed.is_empty() {
            let mut dead = self.shared.dead.lock();
            for addr in failed {
                dead.push(addr);
            }
        }

        Ok(())
    }

    pub fn get_next_packet(&self) -> Option<RawPacket> {
        self.shared.queue.lock().pop_front()
    }

    pub async fn wait_for_incoming_data(&self, delay: RtpTime) -> bool {
        if !self.shared.queue.lock().is_empty() {
            return true;
        }

        if self.abort_flag.swap(false, Ordering::SeqCst) {
            return false;
        }

        let deadline =
            tokio::time::Instant::now() + Duration::new(delay.secs(), delay.micros() * 1000);

        loop {
            tokio::select! {
                _ = self.shared.data_notify.notified() => {
                    if !self.shared.queue.lock().is_empty() || !self.shared.dead.lock().is_empty() {
                        return true;
                    }
                }
                _ = self.abort.notified() => {
                    if self.abort_flag.swap(false, Ordering::SeqCst) {
                        return false;
                    }
                }
                _ = sleep_until(deadline) => return false,
            }
        }
    }

    pub fn abort_wait(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
        self.abort.notify_one();
    }

    pub fn clear_abort(&self) {
        self.abort_flag.store(false, Ordering::SeqCst);
    }

    pub fn delete_destination(&self, addr: &RtpAddress) -> Result<(), Error> {
        let peer = match addr {
            RtpAddress::Tcp(it) => *it,
            _ => return Err(Error::InvalidConfig("tcp destination expected")),
        };

        // the writer half closes here, the reader task follows suit
        if let Ok(mut writers) = self.writers.try_lock() {
            writers.remove(&peer);
        }

        Ok(())
    }

    pub fn clear_destinations(&self) {
        if let Ok(mut writers) = self.writers.try_lock() {
            writers.clear();
        }
    }

    pub fn with_filter<R>(&self, f: impl FnOnce(&mut ReceiveFilter) -> R) -> R {
        f(&mut self.shared.filter.lock())
    }

    /// Failed connections since the last call.  Their writer halves
    /// are dropped here, which is what removes them from the
    /// destination set.
    pub fn take_io_events(&self) -> Vec<IoEvent> {
        let dead = std::mem::take(&mut *self.shared.dead.lock());
        if dead.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(dead.len());
        for addr in dead {
            // a writer still present means the read side noticed first
            let had_writer = self
                .writers
                .try_lock()
                .map(|mut writers| writers.remove(&addr).is_some())
                .unwrap_or(false);

            events.push(IoEvent {
                addr: RtpAddress::Tcp(addr),
                kind: if had_writer {
                    IoEventKind::Receive
                } else {
                    IoEventKind::Send
                },
            });
        }

        events
    }

    pub async fn close_all(&self) {
        self.writers.lock().await.clear();
    }
}

/// Reassemble length-prefixed frames until the peer goes away.
async fn read_frames(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    shared: &Shared,
    max_packet_size: usize,
) -> std::io::Result<()> {
    let addr = RtpAddress::Tcp(peer);

    loop {
        let size = reader.read_u16().await? as usize;
        let mut body = BytesMut::zeroed(size);
        reader.read_exact(&mut body).await?;

        if size > max_packet_size {
            continue;
        }

        if !shared.filter.lock().allows(&addr) {
            continue;
        }

        let is_rtcp = codec::is_rtcp(&body);
        shared.queue.lock().push_back(RawPacket {
            data: body,
            addr: Some(addr.clone()),
            receive_time: RtpTime::now(),
            is_rtcp,
        });

        shared.data_notify.notify_one();
    }
}
