//! Network traffic shaping engine
//!
//! Captures packets matching a filter expression through an external capture
//! capability, applies randomized delay, jitter, loss and bandwidth pacing,
//! then re-injects the surviving packets in capture order.

pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod traits;

// Re-export main types
pub use config::{ShapingConfig, ShapingSession, DEFAULT_FILTER};
pub use core::{DelayModel, ShapingStats, TrafficShaper};
pub use error::{ShaperError, ShaperResult};
pub use services::{ChannelCapture, InjectedPacket, InjectionLog, PacketFeeder, WinDivertCapture};
pub use traits::{CaptureSession, Packet, PacketCapture};
