//! Decay-aware relevance scoring.
//!
//! ```text
//! final_score = similarity + α · exp(-age / τ) + β · importance
//! ```
//!
//! Pure functions only: no clock reads, no I/O. `age` is clamped at zero
//! for records stamped after `now`. Scores are raw ranking keys and are
//! never normalized or clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_state::MemoryRecord;

use crate::error::ValidationError;

/// Weighting coefficients and time constant for [`score`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayParams {
    /// Weight of the recency term (α ≥ 0)
    pub alpha: f64,
    /// Weight of the importance term (β ≥ 0)
    pub beta: f64,
    /// Decay time constant in seconds (τ > 0, may be infinite)
    pub tau_seconds: f64,
    /// Beyond this `age / τ` ratio the recency term is treated as zero
    #[serde(default = "default_max_decay_ratio")]
    pub max_decay_ratio: f64,
}

fn default_max_decay_ratio() -> f64 {
    50.0
}

impl Default for DecayParams {
    fn default() -> Self {
        Self::from_half_life_hours(0.5, 1.0, 72.0)
    }
}

impl DecayParams {
    /// Build parameters whose recency term halves every `half_life_hours`.
    pub fn from_half_life_hours(alpha: f64, beta: f64, half_life_hours: f64) -> Self {
        Self {
            alpha,
            beta,
            tau_seconds: half_life_hours * 3600.0 / std::f64::consts::LN_2,
            max_decay_ratio: default_max_decay_ratio(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let bad = |msg: String| Err(ValidationError::InvalidDecayParams(msg));
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return bad(format!("alpha must be finite and >= 0, got {}", self.alpha));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return bad(format!("beta must be finite and >= 0, got {}", self.beta));
        }
        if self.tau_seconds.is_nan() || self.tau_seconds <= 0.0 {
            return bad(format!("tau must be > 0, got {}", self.tau_seconds));
        }
        if !(self.max_decay_ratio.is_finite() && self.max_decay_ratio > 0.0) {
            return bad(format!(
                "max_decay_ratio must be finite and > 0, got {}",
                self.max_decay_ratio
            ));
        }
        Ok(())
    }
}

/// Recency factor in [0, 1]: `exp(-age / τ)`, or 0 past `max_decay_ratio`.
pub fn recency_factor(age: chrono::Duration, params: &DecayParams) -> f64 {
    let age_seconds = age.num_milliseconds().max(0) as f64 / 1000.0;
    let ratio = age_seconds / params.tau_seconds;
    if !ratio.is_finite() || ratio > params.max_decay_ratio {
        return 0.0;
    }
    (-ratio).exp()
}

/// Combined relevance of `record` for a caller-supplied `similarity` at `now`.
pub fn score(
    similarity: f64,
    record: &MemoryRecord,
    now: DateTime<Utc>,
    params: &DecayParams,
) -> f64 {
    similarity
        + params.alpha * recency_factor(record.age_at(now), params)
        + params.beta * record.importance
}
