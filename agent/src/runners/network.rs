//! Adapter running the traffic shaper as an experiment workload

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use shaper::{PacketCapture, ShapingSession, ShapingStats, TrafficShaper};
use shared::RunOutcome;

use crate::error::AgentResult;
use crate::traits::Runner;

pub struct NetworkRunner {
    shaper: TrafficShaper,
    capture: Box<dyn PacketCapture>,
}

impl NetworkRunner {
    pub fn new(session: ShapingSession, capture: Box<dyn PacketCapture>) -> Self {
        Self {
            shaper: TrafficShaper::new(session),
            capture,
        }
    }

    pub fn stats(&self) -> ShapingStats {
        self.shaper.stats()
    }
}

#[async_trait]
impl Runner for NetworkRunner {
    fn describe(&self) -> String {
        let session = self.shaper.session();
        format!(
            "network shaping of '{}' via {} (delay {:?}, jitter {:?}, loss {:.2}%)",
            session.filter_expression,
            self.capture.name(),
            session.base_delay,
            session.jitter_bound,
            session.loss_probability * 100.0
        )
    }

    fn preflight(&self) -> AgentResult<()> {
        Ok(self.capture.check_available()?)
    }

    async fn run(&mut self, cancel: CancellationToken) -> AgentResult<RunOutcome> {
        Ok(self.shaper.run(self.capture.as_ref(), cancel).await?)
    }
}
