//! Time-of-day traffic model.
//!
//! A profile holds one speed multiplier per hour (1.0 = free flow). Travel
//! times are divided by the factor, so 0.5 doubles an ETA.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Pre-defined traffic profiles.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TrafficProfileKind {
    /// No traffic effects; all hourly factors are 1.0.
    #[default]
    None,
    /// Weekday city pattern with morning and evening rush hours.
    Metro,
    /// Custom per-hour factors (index 0 = midnight, index 23 = 11 PM, UTC).
    Custom([f64; 24]),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrafficProfile {
    pub hourly_factors: [f64; 24],
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self::none()
    }
}

impl TrafficProfile {
    pub fn none() -> Self {
        Self {
            hourly_factors: [1.0; 24],
        }
    }

    /// - 00–06: 1.0  (free flow)
    /// - 07–09: 0.45 (morning rush)
    /// - 09–16: 0.65 (midday)
    /// - 16–19: 0.40 (evening rush)
    /// - 19–23: 0.75 (evening)
    pub fn metro() -> Self {
        let mut f = [1.0_f64; 24];
        f[7] = 0.45;
        f[8] = 0.45;
        for slot in &mut f[9..16] {
            *slot = 0.65;
        }
        f[16] = 0.40;
        f[17] = 0.40;
        f[18] = 0.40;
        for slot in &mut f[19..24] {
            *slot = 0.75;
        }
        Self { hourly_factors: f }
    }

    pub fn from_kind(kind: &TrafficProfileKind) -> Self {
        match kind {
            TrafficProfileKind::None => Self::none(),
            TrafficProfileKind::Metro => Self::metro(),
            TrafficProfileKind::Custom(factors) => Self {
                hourly_factors: *factors,
            },
        }
    }

    pub fn factor_at(&self, at: DateTime<Utc>) -> f64 {
        self.hourly_factors[at.hour() as usize % 24]
    }

    /// Scale a free-flow duration by the factor in effect at `at`.
    pub fn adjust_minutes(&self, free_flow_min: f64, at: DateTime<Utc>) -> f64 {
        free_flow_min / self.factor_at(at)
    }
}

impl TrafficProfileKind {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if let TrafficProfileKind::Custom(factors) = self {
            if factors.iter().any(|f| !f.is_finite() || *f <= 0.0 || *f > 1.0) {
                return Err(DispatchError::Config(
                    "custom traffic factors must lie in (0, 1]".into(),
                ));
            }
        }
        Ok(())
    }
}
