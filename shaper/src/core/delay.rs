//! Per-packet loss and delay decisions

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::ShapingSession;

/// Random loss and delay model for one shaping session
///
/// Owned by the task driving the capture loop; never shared.
pub struct DelayModel {
    session: ShapingSession,
    rng: StdRng,
}

impl DelayModel {
    pub fn new(session: ShapingSession) -> Self {
        Self {
            session,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic model for reproducible runs
    pub fn with_seed(session: ShapingSession, seed: u64) -> Self {
        Self {
            session,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn session(&self) -> &ShapingSession {
        &self.session
    }

    /// Decide whether the next packet is lost
    pub fn should_drop(&mut self) -> bool {
        let p = self.session.loss_probability;
        if p <= 0.0 {
            return false;
        }
        // gen::<f64>() is in [0, 1), so p == 1.0 always drops
        self.rng.gen::<f64>() < p
    }

    /// Base delay plus a uniform offset in [-jitter, +jitter], clamped at zero
    pub fn jittered_delay(&mut self) -> Duration {
        let base = self.session.base_delay;
        let jitter = nanos(self.session.jitter_bound);
        if jitter == 0 {
            return base;
        }

        let offset = self.rng.gen_range(-jitter..=jitter);
        let total = nanos(base).saturating_add(offset).max(0);
        Duration::from_nanos(total as u64)
    }

    /// Serialization delay of `size_bytes` at the bandwidth cap
    pub fn pacing_delay(&self, size_bytes: usize) -> Duration {
        let cap = self.session.bandwidth_cap_bytes_per_second;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(size_bytes as f64 / cap as f64)
    }

    /// Total time a packet of `size_bytes` is held before re-injection
    pub fn effective_delay(&mut self, size_bytes: usize) -> Duration {
        self.jittered_delay() + self.pacing_delay(size_bytes)
    }
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}
