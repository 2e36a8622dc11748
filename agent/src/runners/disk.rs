//! Disk fill: write a file of the requested size and hold it

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use shared::RunOutcome;

use crate::error::{AgentError, AgentResult};
use crate::traits::Runner;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Fresh, uniquely named file in the temp directory
pub fn default_fill_path() -> PathBuf {
    std::env::temp_dir().join(format!("chaos-agent-disk-{}.tmp", uuid::Uuid::new_v4()))
}

pub struct DiskFillRunner {
    path: PathBuf,
    bytes: u64,
}

impl DiskFillRunner {
    /// Without a path the data goes to a fresh file in the temp directory
    pub fn new(path: Option<PathBuf>, bytes: u64) -> Self {
        let path = path.unwrap_or_else(default_fill_path);
        Self {
            path,
            bytes: bytes.max(1),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Removes the fill file on every exit path
struct FillFile {
    path: PathBuf,
}

impl Drop for FillFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("💽 Removed fill file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ Failed to remove fill file {}: {}", self.path.display(), e),
        }
    }
}

#[async_trait]
impl Runner for DiskFillRunner {
    fn describe(&self) -> String {
        format!(
            "disk fill of ~{:.1} MB at {}",
            self.bytes as f64 / 1024.0 / 1024.0,
            self.path.display()
        )
    }

    async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome> {
        // Never overwrite (and later delete) a file that was already there;
        // resolution refuses existing paths, this covers one created since
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    AgentError::validation("path", self.path.display(), "file already exists")
                }
                _ => AgentError::store("create fill file", &self.path, e),
            })?;
        let _guard = FillFile {
            path: self.path.clone(),
        };

        let bytes = self.bytes;
        let token = cancel.clone();
        let filled = tokio::task::spawn_blocking(move || fill(file, bytes, &token))
            .await
            .map_err(|e| AgentError::Runner {
                reason: format!("fill task failed: {}", e),
            })??;

        if filled {
            info!("💽 Wrote {} bytes to {}", bytes, self.path.display());
            cancel.cancelled().await;
        }
        Ok(RunOutcome::Cancelled)
    }
}

/// Write `bytes` in chunks and sync; false if cancelled part way
fn fill(mut file: File, bytes: u64, cancel: &CancellationToken) -> std::io::Result<bool> {
    let chunk = vec![0xA5u8; CHUNK_SIZE];
    let mut written = 0u64;

    while written < bytes {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let len = (bytes - written).min(CHUNK_SIZE as u64) as usize;
        file.write_all(&chunk[..len])?;
        written += len as u64;
    }

    file.sync_all()?;
    Ok(true)
}
