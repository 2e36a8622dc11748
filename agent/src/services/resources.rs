//! Host capacity queries backed by sysinfo

use std::io;
use std::path::{Path, PathBuf};

use sysinfo::{Disks, System};

use crate::error::{AgentError, AgentResult};
use crate::traits::{DiskSpace, SystemResources};

/// Real host resources
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoResources;

impl SysinfoResources {
    pub fn new() -> Self {
        Self
    }
}

impl SystemResources for SysinfoResources {
    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn total_memory_bytes(&self) -> AgentResult<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.total_memory() {
            0 => Err(AgentError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "total memory is not reported on this host",
            ))),
            total => Ok(total),
        }
    }

    fn disk_space(&self, path: &Path) -> AgentResult<DiskSpace> {
        let path = existing_ancestor(path);
        let disks = Disks::new_with_refreshed_list();

        // The volume is the one with the longest mount point containing the path
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskSpace {
                total_bytes: disk.total_space(),
                free_bytes: disk.available_space(),
            })
            .ok_or_else(|| {
                AgentError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted volume holds {}", path.display()),
                ))
            })
    }
}

/// Canonical form of the closest existing ancestor, so symlinked temp dirs resolve
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find_map(|p| p.canonicalize().ok())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_reports_cpus_and_memory() {
        let resources = SysinfoResources::new();
        assert!(resources.cpu_count() >= 1);
        assert!(resources.total_memory_bytes().unwrap() > 0);
    }

    #[test]
    fn test_existing_ancestor_walks_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("a").join("b").join("file.bin");
        assert_eq!(existing_ancestor(&missing), dir.path().canonicalize().unwrap());
    }
}
