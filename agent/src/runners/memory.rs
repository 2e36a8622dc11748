//! Memory hold: allocate, touch every page, keep it until stopped

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use shared::RunOutcome;

use crate::error::{AgentError, AgentResult};
use crate::traits::Runner;

/// Smallest allocation the runner will make
pub const MIN_HOLD_BYTES: u64 = 1024 * 1024;
const PAGE_SIZE: usize = 4096;
const TOUCH_INTERVAL: Duration = Duration::from_secs(2);

pub struct MemoryHoldRunner {
    bytes: u64,
}

impl MemoryHoldRunner {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: bytes.max(MIN_HOLD_BYTES),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[async_trait]
impl Runner for MemoryHoldRunner {
    fn describe(&self) -> String {
        format!("memory hold of ~{:.1} MB", self.bytes as f64 / 1024.0 / 1024.0)
    }

    async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome> {
        let size = usize::try_from(self.bytes)
            .map_err(|_| AgentError::validation("bytes", self.bytes, "exceeds the address space"))?;

        let mut buffer = tokio::task::spawn_blocking(move || allocate(size))
            .await
            .map_err(|e| AgentError::Runner {
                reason: format!("allocation task failed: {}", e),
            })??;
        info!("💾 Holding {} bytes", buffer.len());

        let mut ticker = tokio::time::interval(TOUCH_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    buffer[0] ^= 1;
                }
            }
        }
        Ok(RunOutcome::Cancelled)
    }
}

/// Allocate `size` bytes and write one byte per page so they become resident
fn allocate(size: usize) -> AgentResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(size).map_err(|e| AgentError::Runner {
        reason: format!("cannot allocate {} bytes: {}", size, e),
    })?;
    buffer.resize(size, 0);
    for offset in (0..size).step_by(PAGE_SIZE) {
        buffer[offset] = (offset / PAGE_SIZE) as u8 | 1;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_allocation() {
        assert_eq!(MemoryHoldRunner::new(0).bytes(), MIN_HOLD_BYTES);
        assert_eq!(MemoryHoldRunner::new(8 * MIN_HOLD_BYTES).bytes(), 8 * MIN_HOLD_BYTES);
    }

    #[test]
    fn test_every_page_touched() {
        let buffer = allocate(3 * PAGE_SIZE + 10).unwrap();
        assert_eq!(buffer.len(), 3 * PAGE_SIZE + 10);
        assert!((0..buffer.len()).step_by(PAGE_SIZE).all(|i| buffer[i] != 0));
    }

    #[tokio::test]
    async fn test_holds_until_cancelled() {
        let mut runner = MemoryHoldRunner::new(2 * MIN_HOLD_BYTES);
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    }
}
