//! Capture capability implementations

pub mod channel;
pub mod windivert;

pub use channel::*;
pub use windivert::*;
