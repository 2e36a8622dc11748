//! Capture capability trait definitions
//!
//! The shaping engine never talks to a packet driver directly. A
//! `PacketCapture` opens sessions scoped to a filter expression, and the
//! session hands packets out and takes them back for re-injection.

use async_trait::async_trait;

use crate::error::ShaperResult;

/// One captured packet plus the opaque capture metadata needed to re-inject it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub address: Vec<u8>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, address: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// External packet capture capability
#[async_trait]
pub trait PacketCapture: Send + Sync {
    /// Well-known name of the capability, used in "not installed" reports
    fn name(&self) -> &str;

    /// Check that the capability is installed without opening a session
    fn check_available(&self) -> ShaperResult<()> {
        Ok(())
    }

    /// Open a capture session scoped to packets matching `filter`
    async fn open(&self, filter: &str) -> ShaperResult<Box<dyn CaptureSession>>;
}

/// Live capture session
#[async_trait]
pub trait CaptureSession: Send {
    /// Receive the next matching packet, or `None` once the session is shut down
    async fn recv(&mut self) -> ShaperResult<Option<Packet>>;

    /// Re-inject a packet onto the stack it was captured from
    async fn send(&mut self, packet: &Packet) -> ShaperResult<()>;

    /// Stop the session and release any blocked receive
    fn shutdown(&self) -> ShaperResult<()>;
}
