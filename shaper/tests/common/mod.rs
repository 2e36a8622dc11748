//! Common helpers for shaping loop tests

use shaper::{Packet, PacketFeeder, ShapingConfig, ShapingSession};

/// Validated session with a permissive filter and no bandwidth cap
pub fn session(delay_ms: i64, jitter_ms: i64, loss_percent: f64) -> ShapingSession {
    session_with_bandwidth(delay_ms, jitter_ms, loss_percent, 0)
}

pub fn session_with_bandwidth(delay_ms: i64, jitter_ms: i64, loss_percent: f64, bandwidth_kbps: i64) -> ShapingSession {
    ShapingConfig {
        filter: "outbound and tcp".to_string(),
        delay_ms,
        jitter_ms,
        loss_percent,
        bandwidth_kbps,
    }
    .validate()
    .expect("test session should be valid")
}

/// Feed `count` packets of `size` bytes, each filled with its sequence number
pub fn feed_numbered(feeder: &PacketFeeder, count: u8, size: usize) {
    for seq in 0..count {
        assert!(feeder.feed(Packet::new(vec![seq; size])));
    }
}
