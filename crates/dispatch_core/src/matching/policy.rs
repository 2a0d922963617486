//! Compatibility and ranking rules shared by the matching algorithms.

use std::cmp::Ordering;

use crate::trust::{MAX_SCORE, MIN_SCORE};
use crate::types::{RideTags, VehicleClass};

use super::types::{AvailableCaptain, MatchCandidate};

pub fn is_compatible(captain: &AvailableCaptain, class: VehicleClass, tags: &RideTags) -> bool {
    captain.vehicle_class == class && captain.capabilities.supports(tags)
}

/// Trust score mapped onto `[0, 1]`.
pub fn normalized_trust(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    (score.clamp(MIN_SCORE, MAX_SCORE) - MIN_SCORE) / (MAX_SCORE - MIN_SCORE)
}

/// 1.0 for an immediate pickup, 0.0 at or beyond `max_eta_min`.
pub fn normalized_eta(eta_min: f64, max_eta_min: f64) -> f64 {
    if !eta_min.is_finite() || max_eta_min <= 0.0 {
        return 0.0;
    }
    1.0 - (eta_min.max(0.0) / max_eta_min).min(1.0)
}

/// Weighted blend of normalized trust and ETA, in `[0, 1]`.
pub fn weighted_score(trust: f64, eta_min: f64, trust_weight: f64, eta_weight: f64, max_eta_min: f64) -> f64 {
    let total = trust_weight + eta_weight;
    if total <= 0.0 {
        return 0.0;
    }
    (trust_weight * normalized_trust(trust) + eta_weight * normalized_eta(eta_min, max_eta_min)) / total
}

/// Higher score first; ties go to the captain waiting longest, then the
/// lower id so the order is total.
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.available_since.cmp(&b.available_since))
        .then_with(|| a.captain.cmp(&b.captain))
}

pub fn rank_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(compare_candidates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use chrono::{Duration, TimeZone, Utc};

    fn candidate(id: u64, score: f64, waited_min: i64) -> MatchCandidate {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        MatchCandidate {
            captain: UserId(id),
            pickup_eta_min: 5.0,
            trust_score: 50.0,
            score,
            available_since: base - Duration::minutes(waited_min),
        }
    }

    #[test]
    fn eta_normalization_saturates() {
        assert_eq!(normalized_eta(0.0, 30.0), 1.0);
        assert_eq!(normalized_eta(15.0, 30.0), 0.5);
        assert_eq!(normalized_eta(45.0, 30.0), 0.0);
        assert_eq!(normalized_eta(f64::NAN, 30.0), 0.0);
    }

    #[test]
    fn trust_normalization_clamps() {
        assert_eq!(normalized_trust(50.0), 0.5);
        assert_eq!(normalized_trust(150.0), 1.0);
        assert_eq!(normalized_trust(-5.0), 0.0);
    }

    #[test]
    fn weighted_score_blends_components() {
        // 0.4 * 0.8 + 0.6 * 0.5
        let score = weighted_score(80.0, 15.0, 0.4, 0.6, 30.0);
        assert!((score - 0.62).abs() < 1e-12);
    }

    #[test]
    fn ties_prefer_longest_waiting_then_lowest_id() {
        let mut candidates = vec![
            candidate(3, 0.5, 1),
            candidate(2, 0.5, 10),
            candidate(1, 0.5, 10),
            candidate(4, 0.9, 0),
        ];
        rank_candidates(&mut candidates);
        let order: Vec<u64> = candidates.iter().map(|c| c.captain.0).collect();
        assert_eq!(order, vec![4, 1, 2, 3]);
    }
}
