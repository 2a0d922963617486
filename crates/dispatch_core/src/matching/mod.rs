//! Captain selection for pending rides.
//!
//! [`pool::CaptainPool`] is the shared availability registry; claims on it are
//! atomic, so two concurrent matching passes can never take the same captain.
//! [`algorithm::MatchingAlgorithm`] ranks the compatible, available captains
//! and the dispatcher claims them in rank order until one succeeds.

pub mod algorithm;
pub mod policy;
pub mod pool;
pub mod types;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub use algorithm::{MatchRequest, MatchingAlgorithm, NearestFirstMatching, PickupEtaEstimator, TrustWeightedMatching};
pub use pool::CaptainPool;
pub use types::{AvailableCaptain, CaptainCapabilities, CaptainProfile, CaptainStatus, CaptainUpdate, MatchCandidate};

/// Type of matching algorithm to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingAlgorithmType {
    #[default]
    TrustWeighted,
    NearestFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub algorithm: MatchingAlgorithmType,
    /// Weight of the normalized trust score in the ranking.
    pub trust_weight: f64,
    /// Weight of the normalized pickup ETA in the ranking.
    pub eta_weight: f64,
    /// Pickup ETA that normalizes to the worst score; longer ETAs are excluded.
    pub max_pickup_eta_min: f64,
    /// Captains farther than this (straight line) are never considered.
    pub max_pickup_distance_km: f64,
    /// Failed passes after which a ride reports `MatchTimeout`.
    pub max_attempts: u32,
    /// Interval between background matching rounds.
    pub round_interval_ms: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            algorithm: MatchingAlgorithmType::default(),
            trust_weight: 0.4,
            eta_weight: 0.6,
            max_pickup_eta_min: 30.0,
            max_pickup_distance_km: 10.0,
            max_attempts: 5,
            round_interval_ms: 5_000,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        let weights = [self.trust_weight, self.eta_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(DispatchError::Config(
                "matching weights must be non-negative and not both zero".into(),
            ));
        }
        if !self.max_pickup_eta_min.is_finite() || self.max_pickup_eta_min <= 0.0 {
            return Err(DispatchError::Config("max pickup ETA must be positive".into()));
        }
        if !self.max_pickup_distance_km.is_finite() || self.max_pickup_distance_km <= 0.0 {
            return Err(DispatchError::Config("max pickup distance must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(DispatchError::Config("matching max_attempts must be at least 1".into()));
        }
        if self.round_interval_ms == 0 {
            return Err(DispatchError::Config("matching round interval must be > 0".into()));
        }
        Ok(())
    }
}

pub fn build_matching_algorithm(config: &MatchingConfig) -> Box<dyn MatchingAlgorithm> {
    match config.algorithm {
        MatchingAlgorithmType::TrustWeighted => Box::new(TrustWeightedMatching::from_config(config)),
        MatchingAlgorithmType::NearestFirst => Box::new(NearestFirstMatching::from_config(config)),
    }
}
