//! Shaping core business logic

pub mod delay;
pub mod shaper;

pub use delay::DelayModel;
pub use shaper::{ShapingStats, TrafficShaper};
