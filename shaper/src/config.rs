//! Shaping parameters and their validation

use std::time::Duration;

use crate::error::{ShaperError, ShaperResult};

/// Filter used when the operator supplies an empty expression (matches everything)
pub const DEFAULT_FILTER: &str = "true";

/// Operator-facing shaping parameters, as received from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingConfig {
    pub filter: String,
    pub delay_ms: i64,
    pub jitter_ms: i64,
    pub loss_percent: f64,
    pub bandwidth_kbps: i64,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            delay_ms: 100,
            jitter_ms: 0,
            loss_percent: 0.0,
            bandwidth_kbps: 0,
        }
    }
}

impl ShapingConfig {
    /// Check every parameter and convert into an engine session description.
    ///
    /// Runs before any capture session is opened.
    pub fn validate(&self) -> ShaperResult<ShapingSession> {
        let delay_ms = non_negative("delay", self.delay_ms)?;
        let jitter_ms = non_negative("jitter", self.jitter_ms)?;
        let bandwidth_kbps = non_negative("bandwidth", self.bandwidth_kbps)?;

        if !(0.0..=100.0).contains(&self.loss_percent) {
            return Err(ShaperError::InvalidConfig {
                field: "loss".to_string(),
                value: self.loss_percent.to_string(),
                reason: "must be between 0 and 100".to_string(),
            });
        }

        let filter = self.filter.trim();
        let filter_expression = if filter.is_empty() {
            DEFAULT_FILTER.to_string()
        } else {
            filter.to_string()
        };

        Ok(ShapingSession {
            filter_expression,
            base_delay: Duration::from_millis(delay_ms),
            jitter_bound: Duration::from_millis(jitter_ms),
            loss_probability: self.loss_percent / 100.0,
            bandwidth_cap_bytes_per_second: bandwidth_kbps.saturating_mul(1000) / 8,
        })
    }
}

fn non_negative(field: &str, value: i64) -> ShaperResult<u64> {
    u64::try_from(value).map_err(|_| ShaperError::InvalidConfig {
        field: field.to_string(),
        value: value.to_string(),
        reason: "must be zero or positive".to_string(),
    })
}

/// Validated parameters of one shaping run
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingSession {
    pub filter_expression: String,
    pub base_delay: Duration,
    pub jitter_bound: Duration,
    /// Fraction in [0, 1]
    pub loss_probability: f64,
    /// 0 means unconstrained
    pub bandwidth_cap_bytes_per_second: u64,
}
