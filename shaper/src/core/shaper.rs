//! Sequential capture / delay / re-inject loop
//!
//! Packets are handled strictly one at a time in capture order. A long
//! per-packet delay therefore holds back every packet behind it; the loop
//! never reorders or duplicates.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::RunOutcome;

use crate::config::ShapingSession;
use crate::core::delay::DelayModel;
use crate::error::ShaperResult;
use crate::traits::{CaptureSession, PacketCapture};

/// Counters for one shaping run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapingStats {
    pub captured: u64,
    pub dropped: u64,
    pub injected: u64,
    /// Packets held at cancellation time and never re-injected
    pub abandoned: u64,
}

/// Traffic shaper driving one capture session
pub struct TrafficShaper {
    model: DelayModel,
    stats: ShapingStats,
}

impl TrafficShaper {
    pub fn new(session: ShapingSession) -> Self {
        Self {
            model: DelayModel::new(session),
            stats: ShapingStats::default(),
        }
    }

    /// Shaper with a seeded random source (fluent API)
    pub fn with_seed(self, seed: u64) -> Self {
        let session = self.model.session().clone();
        Self {
            model: DelayModel::with_seed(session, seed),
            stats: self.stats,
        }
    }

    pub fn session(&self) -> &ShapingSession {
        self.model.session()
    }

    pub fn stats(&self) -> ShapingStats {
        self.stats
    }

    /// Open a capture session and shape traffic until cancelled or the session ends
    ///
    /// Cancellation is a clean stop: any packet still being delayed is dropped
    /// on the floor and the session is shut down before returning.
    pub async fn run(&mut self, capture: &dyn PacketCapture, cancel: CancellationToken) -> ShaperResult<RunOutcome> {
        let filter = self.model.session().filter_expression.clone();
        let mut session = capture.open(&filter).await?;

        info!(
            "📶 Shaping '{}' via {}: delay={:?} jitter={:?} loss={:.2}% cap={}B/s",
            filter,
            capture.name(),
            self.model.session().base_delay,
            self.model.session().jitter_bound,
            self.model.session().loss_probability * 100.0,
            self.model.session().bandwidth_cap_bytes_per_second
        );

        let result = self.shape(session.as_mut(), &cancel).await;

        if let Err(e) = session.shutdown() {
            debug!("Capture shutdown after shaping returned: {}", e);
        }

        match &result {
            Ok(outcome) => info!("📶 Shaping stopped ({:?}): {:?}", outcome, self.stats),
            Err(e) => warn!("📶 Shaping aborted: {} ({:?})", e, self.stats),
        }
        result
    }

    async fn shape(&mut self, session: &mut dyn CaptureSession, cancel: &CancellationToken) -> ShaperResult<RunOutcome> {
        loop {
            let packet = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                received = session.recv() => match received {
                    Ok(Some(packet)) => packet,
                    Ok(None) if cancel.is_cancelled() => return Ok(RunOutcome::Cancelled),
                    Ok(None) => return Ok(RunOutcome::Completed),
                    Err(_) if cancel.is_cancelled() => return Ok(RunOutcome::Cancelled),
                    Err(e) => return Err(e),
                },
            };
            self.stats.captured += 1;

            if self.model.should_drop() {
                self.stats.dropped += 1;
                continue;
            }

            let delay = self.model.effective_delay(packet.len());
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.stats.abandoned += 1;
                        return Ok(RunOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match session.send(&packet).await {
                Ok(()) => self.stats.injected += 1,
                Err(_) if cancel.is_cancelled() => {
                    self.stats.abandoned += 1;
                    return Ok(RunOutcome::Cancelled);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
