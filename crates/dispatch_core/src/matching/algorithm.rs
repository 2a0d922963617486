use chrono::{DateTime, Utc};

use crate::spatial::distance_km;
use crate::trust::TrustScores;
use crate::types::{Location, RideId, RideTags, VehicleClass};

use super::policy::{is_compatible, normalized_eta, rank_candidates, weighted_score};
use super::types::{AvailableCaptain, MatchCandidate};
use super::MatchingConfig;

/// Pickup travel time from a captain's position to the rider.
pub trait PickupEtaEstimator: Send + Sync {
    fn pickup_eta_minutes(&self, from: &Location, to: &Location, at: DateTime<Utc>) -> Option<f64>;
}

/// The ride-side inputs of one matching attempt.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub ride: RideId,
    pub pickup: &'a Location,
    pub vehicle_class: VehicleClass,
    pub tags: &'a RideTags,
    pub at: DateTime<Utc>,
}

/// Trait for matching algorithms: rank the captains that could serve a ride.
/// The caller claims captains in the returned order.
pub trait MatchingAlgorithm: Send + Sync {
    fn rank(
        &self,
        request: &MatchRequest<'_>,
        captains: &[AvailableCaptain],
        eta: &dyn PickupEtaEstimator,
        trust: &dyn TrustScores,
    ) -> Vec<MatchCandidate>;
}

/// Compatible captains within range, scored by `score_fn(trust, eta)`.
fn scored_candidates(
    request: &MatchRequest<'_>,
    captains: &[AvailableCaptain],
    eta: &dyn PickupEtaEstimator,
    trust: &dyn TrustScores,
    max_pickup_distance_km: f64,
    max_pickup_eta_min: f64,
    score_fn: impl Fn(f64, f64) -> f64,
) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> = captains
        .iter()
        .filter(|captain| is_compatible(captain, request.vehicle_class, request.tags))
        .filter(|captain| {
            distance_km(&captain.location, request.pickup)
                .is_some_and(|km| km <= max_pickup_distance_km)
        })
        .filter_map(|captain| {
            let pickup_eta_min = eta.pickup_eta_minutes(&captain.location, request.pickup, request.at)?;
            if pickup_eta_min > max_pickup_eta_min {
                return None;
            }
            let trust_score = trust.score(captain.id);
            Some(MatchCandidate {
                captain: captain.id,
                pickup_eta_min,
                trust_score,
                score: score_fn(trust_score, pickup_eta_min),
                available_since: captain.available_since,
            })
        })
        .collect();
    rank_candidates(&mut candidates);
    candidates
}

/// Blends captain trust with pickup ETA.
#[derive(Debug, Clone, Copy)]
pub struct TrustWeightedMatching {
    pub trust_weight: f64,
    pub eta_weight: f64,
    pub max_pickup_eta_min: f64,
    pub max_pickup_distance_km: f64,
}

impl TrustWeightedMatching {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            trust_weight: config.trust_weight,
            eta_weight: config.eta_weight,
            max_pickup_eta_min: config.max_pickup_eta_min,
            max_pickup_distance_km: config.max_pickup_distance_km,
        }
    }
}

impl Default for TrustWeightedMatching {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl MatchingAlgorithm for TrustWeightedMatching {
    fn rank(
        &self,
        request: &MatchRequest<'_>,
        captains: &[AvailableCaptain],
        eta: &dyn PickupEtaEstimator,
        trust: &dyn TrustScores,
    ) -> Vec<MatchCandidate> {
        scored_candidates(
            request,
            captains,
            eta,
            trust,
            self.max_pickup_distance_km,
            self.max_pickup_eta_min,
            |trust_score, eta_min| {
                weighted_score(
                    trust_score,
                    eta_min,
                    self.trust_weight,
                    self.eta_weight,
                    self.max_pickup_eta_min,
                )
            },
        )
    }
}

/// Ranks by pickup ETA alone; trust is reported but ignored.
#[derive(Debug, Clone, Copy)]
pub struct NearestFirstMatching {
    pub max_pickup_eta_min: f64,
    pub max_pickup_distance_km: f64,
}

impl NearestFirstMatching {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            max_pickup_eta_min: config.max_pickup_eta_min,
            max_pickup_distance_km: config.max_pickup_distance_km,
        }
    }
}

impl MatchingAlgorithm for NearestFirstMatching {
    fn rank(
        &self,
        request: &MatchRequest<'_>,
        captains: &[AvailableCaptain],
        eta: &dyn PickupEtaEstimator,
        trust: &dyn TrustScores,
    ) -> Vec<MatchCandidate> {
        scored_candidates(
            request,
            captains,
            eta,
            trust,
            self.max_pickup_distance_km,
            self.max_pickup_eta_min,
            |_, eta_min| normalized_eta(eta_min, self.max_pickup_eta_min),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::types::CaptainCapabilities;
    use crate::spatial::{offset_km, travel_minutes};
    use crate::types::UserId;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    struct StraightLine;

    impl PickupEtaEstimator for StraightLine {
        fn pickup_eta_minutes(&self, from: &Location, to: &Location, _at: DateTime<Utc>) -> Option<f64> {
            distance_km(from, to).map(|km| travel_minutes(km, 30.0))
        }
    }

    struct FixedTrust(HashMap<UserId, f64>);

    impl TrustScores for FixedTrust {
        fn score(&self, user: UserId) -> f64 {
            self.0.get(&user).copied().unwrap_or(50.0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap()
    }

    fn pickup() -> Location {
        Location::new(52.52, 13.405)
    }

    fn captain(id: u64, north_km: f64, class: VehicleClass) -> AvailableCaptain {
        AvailableCaptain {
            id: UserId(id),
            vehicle_class: class,
            capabilities: CaptainCapabilities {
                no_smoking: true,
                ac_vehicle: true,
                ..Default::default()
            },
            location: offset_km(&pickup(), north_km, 0.0),
            available_since: now() - Duration::minutes(id as i64),
        }
    }

    fn request<'a>(pickup: &'a Location, tags: &'a RideTags) -> MatchRequest<'a> {
        MatchRequest {
            ride: RideId(1),
            pickup,
            vehicle_class: VehicleClass::Mini,
            tags,
            at: now(),
        }
    }

    #[test]
    fn high_trust_outranks_slightly_closer_captain() {
        let pickup = pickup();
        let tags = RideTags::default();
        let captains = vec![captain(1, 1.0, VehicleClass::Mini), captain(2, 1.5, VehicleClass::Mini)];
        let trust = FixedTrust(HashMap::from([(UserId(1), 20.0), (UserId(2), 95.0)]));
        let ranked = TrustWeightedMatching::default().rank(&request(&pickup, &tags), &captains, &StraightLine, &trust);
        assert_eq!(ranked[0].captain, UserId(2));
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn nearest_first_ignores_trust() {
        let pickup = pickup();
        let tags = RideTags::default();
        let captains = vec![captain(1, 1.0, VehicleClass::Mini), captain(2, 1.5, VehicleClass::Mini)];
        let trust = FixedTrust(HashMap::from([(UserId(1), 20.0), (UserId(2), 95.0)]));
        let algorithm = NearestFirstMatching::from_config(&MatchingConfig::default());
        let ranked = algorithm.rank(&request(&pickup, &tags), &captains, &StraightLine, &trust);
        assert_eq!(ranked[0].captain, UserId(1));
    }

    #[test]
    fn incompatible_and_distant_captains_are_excluded() {
        let pickup = pickup();
        let tags = RideTags {
            pets_allowed: true,
            ..RideTags::default()
        };
        let mut pet_friendly = captain(1, 1.0, VehicleClass::Mini);
        pet_friendly.capabilities.pets_allowed = true;
        let mut wrong_class = captain(2, 0.5, VehicleClass::Sedan);
        wrong_class.capabilities.pets_allowed = true;
        let no_pets = captain(3, 0.5, VehicleClass::Mini);
        let mut too_far = captain(4, 25.0, VehicleClass::Mini);
        too_far.capabilities.pets_allowed = true;

        let ranked = TrustWeightedMatching::default().rank(
            &request(&pickup, &tags),
            &[pet_friendly, wrong_class, no_pets, too_far],
            &StraightLine,
            &FixedTrust(HashMap::new()),
        );
        let ids: Vec<UserId> = ranked.iter().map(|c| c.captain).collect();
        assert_eq!(ids, vec![UserId(1)]);
    }

    #[test]
    fn equal_scores_go_to_longest_waiting_captain() {
        let pickup = pickup();
        let tags = RideTags::default();
        // Same position and trust; captain 5 became available earlier.
        let captains = vec![captain(2, 1.0, VehicleClass::Mini), captain(5, 1.0, VehicleClass::Mini)];
        let ranked = TrustWeightedMatching::default().rank(
            &request(&pickup, &tags),
            &captains,
            &StraightLine,
            &FixedTrust(HashMap::new()),
        );
        assert_eq!(ranked[0].captain, UserId(5));
    }
}
