//! Average speed and speed-limit delta for a transit.

use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// Limit reduction applied when both gates of a route report rain.
pub const RAIN_PENALTY: f64 = 20.0;
/// Fine amount per unit of speed over the limit.
pub const FINE_RATE: f64 = 10.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedInputs {
    pub entry_at: DateTime<Utc>,
    pub exit_at: DateTime<Utc>,
    pub distance: f64,
    pub base_limit: u32,
    pub entry_raining: bool,
    pub exit_raining: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedAssessment {
    pub elapsed_hours: f64,
    pub effective_limit: f64,
    pub average_speed: f64,
    pub speed_delta: f64,
}

impl SpeedAssessment {
    pub fn is_violation(&self) -> bool {
        self.speed_delta > 0.0
    }

    /// `None` when the transit is compliant.
    pub fn fine_amount(&self) -> Option<f64> {
        if self.is_violation() {
            Some(round5(self.speed_delta * FINE_RATE))
        } else {
            None
        }
    }
}

pub fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

pub fn effective_limit(base_limit: u32, entry_raining: bool, exit_raining: bool) -> f64 {
    let base = base_limit as f64;
    if entry_raining && exit_raining {
        base - RAIN_PENALTY
    } else {
        base
    }
}

pub fn assess(inputs: &SpeedInputs) -> Result<SpeedAssessment, EngineError> {
    let elapsed = inputs.exit_at - inputs.entry_at;
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        return Err(EngineError::BadRequest(String::from(
            "exit time must be later than entry time",
        )));
    }
    if !(inputs.distance.is_finite() && inputs.distance >= 0.0) {
        return Err(EngineError::Internal(format!(
            "route distance {} is not a valid length",
            inputs.distance
        )));
    }

    let elapsed_hours = millis as f64 / MILLIS_PER_HOUR;
    let effective_limit =
        effective_limit(inputs.base_limit, inputs.entry_raining, inputs.exit_raining);
    let average_speed = round5(inputs.distance / elapsed_hours);
    let speed_delta = round5(average_speed - effective_limit);

    Ok(SpeedAssessment {
        elapsed_hours,
        effective_limit,
        average_speed,
        speed_delta,
    })
}
