//! Workload runners, one per experiment kind

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

pub use cpu::CpuLoadRunner;
pub use disk::DiskFillRunner;
pub use memory::MemoryHoldRunner;
pub use network::NetworkRunner;
