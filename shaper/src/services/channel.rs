//! In-process capture capability backed by a channel
//!
//! Lets the shaping loop run without a packet driver: packets are fed in
//! from a `PacketFeeder` and re-injected packets land in an `InjectionLog`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ShaperError, ShaperResult};
use crate::traits::{CaptureSession, Packet, PacketCapture};

/// Sending half of a `ChannelCapture`; dropping it ends the session
#[derive(Clone)]
pub struct PacketFeeder {
    tx: mpsc::UnboundedSender<Packet>,
}

impl PacketFeeder {
    /// Queue a packet for capture. Returns false once the session is gone.
    pub fn feed(&self, packet: Packet) -> bool {
        self.tx.send(packet).is_ok()
    }
}

/// A packet as it left the shaper
#[derive(Debug, Clone)]
pub struct InjectedPacket {
    pub packet: Packet,
    pub injected_at: Instant,
}

/// Shared record of re-injected packets, in injection order
#[derive(Debug, Clone, Default)]
pub struct InjectionLog(Arc<Mutex<Vec<InjectedPacket>>>);

impl InjectionLog {
    fn push(&self, packet: &Packet) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(InjectedPacket {
                packet: packet.clone(),
                injected_at: Instant::now(),
            });
        }
    }

    pub fn snapshot(&self) -> Vec<InjectedPacket> {
        self.0.lock().map(|entries| entries.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channel-backed capture capability; supports a single session
pub struct ChannelCapture {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    log: InjectionLog,
    opened_filter: Arc<Mutex<Option<String>>>,
    shut_down: Arc<AtomicBool>,
    fail_sends: bool,
}

impl ChannelCapture {
    pub fn new() -> (Self, PacketFeeder) {
        let (tx, rx) = mpsc::unbounded_channel();
        let capture = Self {
            rx: Mutex::new(Some(rx)),
            log: InjectionLog::default(),
            opened_filter: Arc::new(Mutex::new(None)),
            shut_down: Arc::new(AtomicBool::new(false)),
            fail_sends: false,
        };
        (capture, PacketFeeder { tx })
    }

    /// Make every re-injection fail (fluent API)
    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn injected(&self) -> InjectionLog {
        self.log.clone()
    }

    /// Filter the session was opened with, if any
    pub fn opened_filter(&self) -> Option<String> {
        self.opened_filter.lock().ok().and_then(|f| f.clone())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PacketCapture for ChannelCapture {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open(&self, filter: &str) -> ShaperResult<Box<dyn CaptureSession>> {
        let rx = self
            .rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| ShaperError::Open {
                filter: filter.to_string(),
                reason: "channel capture already opened".to_string(),
            })?;

        if let Ok(mut opened) = self.opened_filter.lock() {
            *opened = Some(filter.to_string());
        }

        Ok(Box::new(ChannelSession {
            rx,
            log: self.log.clone(),
            shut_down: self.shut_down.clone(),
            fail_sends: self.fail_sends,
        }))
    }
}

struct ChannelSession {
    rx: mpsc::UnboundedReceiver<Packet>,
    log: InjectionLog,
    shut_down: Arc<AtomicBool>,
    fail_sends: bool,
}

#[async_trait]
impl CaptureSession for ChannelSession {
    async fn recv(&mut self) -> ShaperResult<Option<Packet>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, packet: &Packet) -> ShaperResult<()> {
        if self.fail_sends {
            return Err(ShaperError::Inject {
                reason: "injection disabled on this channel".to_string(),
            });
        }
        self.log.push(packet);
        Ok(())
    }

    fn shutdown(&self) -> ShaperResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
