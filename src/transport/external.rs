use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use bytes::BytesMut;
use codec::time::RtpTime;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::sleep_until};

use super::{RawPacket, ReceiveFilter, RtpAddress};
use crate::error::Error;

/// Callback an external transmitter forwards outgoing data to.
pub type SendHook = Box<dyn Fn(&[u8], bool) + Send + Sync>;

pub struct ExternalParams {
    /// Per-packet transport overhead the embedding reports, for the
    /// scheduler's bandwidth arithmetic.
    pub header_overhead: usize,
    /// Receives every outgoing buffer together with an RTCP flag.
    pub send_hook: Option<SendHook>,
}

impl Default for ExternalParams {
    fn default() -> Self {
        Self {
            header_overhead: 0,
            send_hook: None,
        }
    }
}

/// A transmitter with no sockets of its own: the embedding injects
/// received packets and collects outgoing ones through a hook.  This
/// is the seam for SRTP wrappers, tunnels and tests.
pub struct ExternalTransmitter {
    header_overhead: usize,
    send_hook: Option<SendHook>,
    queue: Mutex<VecDeque<RawPacket>>,
    filter: Mutex<ReceiveFilter>,
    local: Mutex<Vec<RtpAddress>>,
    data_notify: Notify,
    abort: Notify,
    abort_flag: AtomicBool,
}

impl ExternalTransmitter {
    pub fn create(params: ExternalParams) -> Self {
        Self {
            header_overhead: params.header_overhead,
            send_hook: params.send_hook,
            queue: Mutex::new(VecDeque::new()),
            filter: Mutex::new(ReceiveFilter::default()),
            local: Mutex::new(Vec::new()),
            data_notify: Notify::new(),
            abort: Notify::new(),
            abort_flag: AtomicBool::new(false),
        }
    }

    /// Hand a received packet to the session.
    pub fn inject(&self, data: &[u8], addr: Option<RtpAddress>, is_rtcp: bool) {
        if let Some(addr) = &addr {
            if !self.filter.lock().allows(addr) {
                return;
            }
        }

        self.queue.lock().push_back(RawPacket {
            data: BytesMut::from(data),
            addr,
            receive_time: RtpTime::now(),
            is_rtcp,
        });

        self.data_notify.notify_one();
    }

    /// Declare an address as ours, so looped-back traffic is
    /// recognized.
    pub fn add_local_address(&self, addr: RtpAddress) {
        self.local.lock().push(addr);
    }

    pub fn send(&self, data: &[u8], rtcp: bool) -> Result<(), Error> {
        if let Some(hook) = &self.send_hook {
            hook(data, rtcp);
        }

        Ok(())
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

        let deadline =
            tokio::time::Instant::now() + Duration::new(delay.secs(), delay.micros() * 1000);

        loop {
            tokio::select! {
                _ = self.data_notify.notified() => {
                    if !self.queue.lock().is_empty() {
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

    pub fn with_filter<R>(&self, f: impl FnOnce(&mut ReceiveFilter) -> R) -> R {
        f(&mut self.filter.lock())
    }

    pub fn comes_from_this_transmitter(&self, addr: &RtpAddress) -> bool {
        self.local.lock().contains(addr)
    }

    pub fn header_overhead(&self) -> usize {
        self.header_overhead
    }
}
