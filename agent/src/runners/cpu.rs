//! CPU burn on a fixed number of OS threads

use std::hint::black_box;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shared::RunOutcome;

use crate::error::{AgentError, AgentResult};
use crate::traits::Runner;

/// Duty-cycle period; each thread is busy for `percent` of it
const PERIOD: Duration = Duration::from_millis(100);

pub struct CpuLoadRunner {
    cores: usize,
    percent: u8,
}

impl CpuLoadRunner {
    pub fn new(cores: usize, percent: u8) -> Self {
        Self {
            cores: cores.max(1),
            percent: percent.clamp(1, 100),
        }
    }

    fn busy_slice(&self) -> Duration {
        PERIOD * u32::from(self.percent) / 100
    }
}

#[async_trait]
impl Runner for CpuLoadRunner {
    fn describe(&self) -> String {
        format!("CPU load on {} core(s) at {}%", self.cores, self.percent)
    }

    async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome> {
        let busy = self.busy_slice();
        let workers: Vec<_> = (0..self.cores)
            .map(|_| {
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || burn(busy, &cancel))
            })
            .collect();

        cancel.cancelled().await;

        for worker in workers {
            let cycles = worker.await.map_err(|e| AgentError::Runner {
                reason: format!("cpu worker panicked: {}", e),
            })?;
            debug!("CPU worker stopped after {} cycles", cycles);
        }
        Ok(RunOutcome::Cancelled)
    }
}

/// Spin for `busy`, sleep for the rest of the period, until cancelled
fn burn(busy: Duration, cancel: &CancellationToken) -> u64 {
    let idle = PERIOD.saturating_sub(busy);
    let mut cycles = 0u64;
    let mut state = 0u64;

    while !cancel.is_cancelled() {
        let start = Instant::now();
        while start.elapsed() < busy {
            state = black_box(state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223));
        }
        if !idle.is_zero() {
            std::thread::sleep(idle);
        }
        cycles += 1;
    }
    cycles
}
