//! Agent services implementations

pub mod launcher;
pub mod process_probe;
pub mod record_store;
pub mod resources;

pub use launcher::*;
pub use process_probe::*;
pub use record_store::*;
pub use resources::*;
