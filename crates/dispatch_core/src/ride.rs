//! Ride state machine.
//!
//! ```text
//! pending ──match──▶ accepted ──verify pickup──▶ ongoing ──complete──▶ completed
//!    │                  │
//!    └──────cancel──────┴──▶ cancelled
//! ```
//!
//! Every transition method either applies fully or returns an error and
//! leaves the ride untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::otp::{OtpSecret, OtpVerdict};
use crate::pricing::FareBreakdown;
use crate::types::{Location, Money, RideId, RideTags, TripMetrics, UserId, VehicleClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Pending,
    Accepted,
    Ongoing,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Ongoing => "ongoing",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that can be refused with `InvalidTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideAction {
    Match,
    VerifyPickup,
    Complete,
    Cancel,
    Settle,
    Review,
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RideAction::Match => "match",
            RideAction::VerifyPickup => "verify pickup for",
            RideAction::Complete => "complete",
            RideAction::Cancel => "cancel",
            RideAction::Settle => "settle",
            RideAction::Review => "review",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Completed, payment not yet attempted.
    Unsettled,
    Settled,
    /// Payment failed; waiting for reconciliation.
    NeedsReconciliation,
}

/// Provider references copied onto the ride after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub transaction_id: String,
    pub order_id: String,
    pub signature: String,
}

/// Status plus exactly the data that status carries. A captain exists from
/// `Accepted` on and cannot be swapped: no transition rewrites it.
#[derive(Debug, Clone, PartialEq)]
pub enum RideState {
    Pending {
        match_attempts: u32,
    },
    Accepted {
        captain: UserId,
        matched_at: DateTime<Utc>,
    },
    Ongoing {
        captain: UserId,
        matched_at: DateTime<Utc>,
        picked_up_at: DateTime<Utc>,
    },
    Completed {
        captain: UserId,
        matched_at: DateTime<Utc>,
        picked_up_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        metrics: TripMetrics,
        settlement: SettlementStatus,
    },
    Cancelled {
        captain: Option<UserId>,
        cancelled_at: DateTime<Utc>,
        reason: Option<String>,
    },
}

impl RideState {
    pub fn status(&self) -> RideStatus {
        match self {
            RideState::Pending { .. } => RideStatus::Pending,
            RideState::Accepted { .. } => RideStatus::Accepted,
            RideState::Ongoing { .. } => RideStatus::Ongoing,
            RideState::Completed { .. } => RideStatus::Completed,
            RideState::Cancelled { .. } => RideStatus::Cancelled,
        }
    }

    pub fn captain(&self) -> Option<UserId> {
        match self {
            RideState::Pending { .. } => None,
            RideState::Accepted { captain, .. }
            | RideState::Ongoing { captain, .. }
            | RideState::Completed { captain, .. } => Some(*captain),
            RideState::Cancelled { captain, .. } => *captain,
        }
    }
}

/// Everything needed to open a ride. Built by the dispatcher after
/// validation, pricing and OTP issuing.
pub struct NewRide {
    pub id: RideId,
    pub rider: UserId,
    pub pickup: Location,
    pub destination: Location,
    pub vehicle_class: VehicleClass,
    pub tags: RideTags,
    pub estimated_metrics: TripMetrics,
    pub estimated_fare: FareBreakdown,
    pub otp: OtpSecret,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Ride {
    id: RideId,
    rider: UserId,
    pickup: Location,
    destination: Location,
    vehicle_class: VehicleClass,
    tags: RideTags,
    estimated_metrics: TripMetrics,
    estimated_fare: FareBreakdown,
    final_fare: Option<FareBreakdown>,
    payment: Option<PaymentLink>,
    created_at: DateTime<Utc>,
    state: RideState,
    otp: OtpSecret,
}

impl Ride {
    pub fn new(new: NewRide) -> Self {
        Self {
            id: new.id,
            rider: new.rider,
            pickup: new.pickup,
            destination: new.destination,
            vehicle_class: new.vehicle_class,
            tags: new.tags,
            estimated_metrics: new.estimated_metrics,
            estimated_fare: new.estimated_fare,
            final_fare: None,
            payment: None,
            created_at: new.created_at,
            state: RideState::Pending { match_attempts: 0 },
            otp: new.otp,
        }
    }

    pub fn id(&self) -> RideId {
        self.id
    }

    pub fn rider(&self) -> UserId {
        self.rider
    }

    pub fn captain(&self) -> Option<UserId> {
        self.state.captain()
    }

    pub fn status(&self) -> RideStatus {
        self.state.status()
    }

    pub fn state(&self) -> &RideState {
        &self.state
    }

    pub fn pickup(&self) -> &Location {
        &self.pickup
    }

    pub fn destination(&self) -> &Location {
        &self.destination
    }

    pub fn vehicle_class(&self) -> VehicleClass {
        self.vehicle_class
    }

    pub fn tags(&self) -> &RideTags {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn final_fare(&self) -> Option<&FareBreakdown> {
        self.final_fare.as_ref()
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.rider == user || self.captain() == Some(user)
    }

    pub fn match_attempts(&self) -> u32 {
        match self.state {
            RideState::Pending { match_attempts } => match_attempts,
            _ => 0,
        }
    }

    pub fn settlement(&self) -> Option<SettlementStatus> {
        match self.state {
            RideState::Completed { settlement, .. } => Some(settlement),
            _ => None,
        }
    }

    fn reject(&self, action: RideAction) -> DispatchError {
        DispatchError::InvalidTransition {
            ride: self.id,
            from: self.status(),
            action,
        }
    }

    /// Count one unsuccessful matching pass. Returns the attempts so far.
    pub fn record_failed_match(&mut self) -> Result<u32, DispatchError> {
        match &mut self.state {
            RideState::Pending { match_attempts } => {
                *match_attempts = match_attempts.saturating_add(1);
                Ok(*match_attempts)
            }
            _ => Err(self.reject(RideAction::Match)),
        }
    }

    pub fn assign_captain(&mut self, captain: UserId, now: DateTime<Utc>) -> Result<(), DispatchError> {
        match self.state {
            RideState::Pending { .. } => {
                self.state = RideState::Accepted {
                    captain,
                    matched_at: now,
                };
                Ok(())
            }
            _ => Err(self.reject(RideAction::Match)),
        }
    }

    /// Check the code shown at pickup. Only an accepted ride can move to
    /// ongoing. Ongoing and completed rides have already spent their code, so
    /// any further submission is a mismatch. A cancelled ride never reached
    /// pickup and rejects the call as a transition.
    pub fn verify_pickup(&mut self, code: &str, max_attempts: u32, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let (captain, matched_at) = match self.state {
            RideState::Accepted { captain, matched_at } => (captain, matched_at),
            RideState::Ongoing { .. } | RideState::Completed { .. } => {
                return Err(DispatchError::OtpMismatch {
                    ride: self.id,
                    remaining: 0,
                })
            }
            _ => return Err(self.reject(RideAction::VerifyPickup)),
        };
        match self.otp.verify(code, max_attempts) {
            OtpVerdict::Accepted => {
                self.state = RideState::Ongoing {
                    captain,
                    matched_at,
                    picked_up_at: now,
                };
                Ok(())
            }
            OtpVerdict::Rejected { remaining } => Err(DispatchError::OtpMismatch {
                ride: self.id,
                remaining,
            }),
            OtpVerdict::Spent => Err(DispatchError::OtpMismatch {
                ride: self.id,
                remaining: 0,
            }),
            OtpVerdict::Locked => Err(DispatchError::OtpAttemptsExhausted(self.id)),
        }
    }

    /// Record the measured trip and the authoritative fare computed from it.
    pub fn complete(
        &mut self,
        metrics: TripMetrics,
        final_fare: FareBreakdown,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        match self.state {
            RideState::Ongoing {
                captain,
                matched_at,
                picked_up_at,
            } => {
                self.state = RideState::Completed {
                    captain,
                    matched_at,
                    picked_up_at,
                    completed_at: now,
                    metrics,
                    settlement: SettlementStatus::Unsettled,
                };
                self.final_fare = Some(final_fare);
                self.otp.invalidate();
                Ok(())
            }
            _ => Err(self.reject(RideAction::Complete)),
        }
    }

    /// Cancel from pending or accepted. Returns the captain to release, if any.
    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<Option<UserId>, DispatchError> {
        let captain = match self.state {
            RideState::Pending { .. } => None,
            RideState::Accepted { captain, .. } => Some(captain),
            _ => return Err(self.reject(RideAction::Cancel)),
        };
        self.state = RideState::Cancelled {
            captain,
            cancelled_at: now,
            reason,
        };
        self.otp.invalidate();
        Ok(captain)
    }

    /// Amount owed: the final fare once completed.
    pub fn amount_due(&self) -> Result<Money, DispatchError> {
        match (&self.state, &self.final_fare) {
            (RideState::Completed { .. }, Some(fare)) => Ok(fare.total),
            _ => Err(self.reject(RideAction::Settle)),
        }
    }

    pub fn mark_settled(&mut self, link: PaymentLink) -> Result<(), DispatchError> {
        self.set_settlement(SettlementStatus::Settled)?;
        self.payment = Some(link);
        Ok(())
    }

    pub fn mark_needs_reconciliation(&mut self) -> Result<(), DispatchError> {
        self.set_settlement(SettlementStatus::NeedsReconciliation)
    }

    fn set_settlement(&mut self, status: SettlementStatus) -> Result<(), DispatchError> {
        match &mut self.state {
            RideState::Completed { settlement, .. } => {
                *settlement = status;
                Ok(())
            }
            _ => Err(self.reject(RideAction::Settle)),
        }
    }

    pub fn snapshot(&self) -> RideSnapshot {
        let (matched_at, picked_up_at, completed_at, final_metrics) = match &self.state {
            RideState::Pending { .. } | RideState::Cancelled { .. } => (None, None, None, None),
            RideState::Accepted { matched_at, .. } => (Some(*matched_at), None, None, None),
            RideState::Ongoing {
                matched_at,
                picked_up_at,
                ..
            } => (Some(*matched_at), Some(*picked_up_at), None, None),
            RideState::Completed {
                matched_at,
                picked_up_at,
                completed_at,
                metrics,
                ..
            } => (Some(*matched_at), Some(*picked_up_at), Some(*completed_at), Some(*metrics)),
        };
        let (cancelled_at, cancel_reason) = match &self.state {
            RideState::Cancelled {
                cancelled_at, reason, ..
            } => (Some(*cancelled_at), reason.clone()),
            _ => (None, None),
        };
        RideSnapshot {
            id: self.id,
            rider: self.rider,
            captain: self.captain(),
            status: self.status(),
            pickup: self.pickup.clone(),
            destination: self.destination.clone(),
            vehicle_class: self.vehicle_class,
            tags: self.tags,
            estimated_metrics: self.estimated_metrics,
            estimated_fare: self.estimated_fare.total,
            final_metrics,
            final_fare: self.final_fare.map(|fare| fare.total),
            settlement: self.settlement(),
            payment: self.payment.clone(),
            match_attempts: self.match_attempts(),
            created_at: self.created_at,
            matched_at,
            picked_up_at,
            completed_at,
            cancelled_at,
            cancel_reason,
        }
    }
}

/// Read model of a ride. Carries no pickup code material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub id: RideId,
    pub rider: UserId,
    pub captain: Option<UserId>,
    pub status: RideStatus,
    pub pickup: Location,
    pub destination: Location,
    pub vehicle_class: VehicleClass,
    pub tags: RideTags,
    pub estimated_metrics: TripMetrics,
    pub estimated_fare: Money,
    pub final_metrics: Option<TripMetrics>,
    pub final_fare: Option<Money>,
    pub settlement: Option<SettlementStatus>,
    pub payment: Option<PaymentLink>,
    pub match_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{OtpConfig, OtpIssuer, PickupCode};
    use crate::pricing::FareCalculator;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn ride() -> (Ride, PickupCode) {
        let (otp, code) = OtpIssuer::new(&OtpConfig::default()).issue();
        let metrics = TripMetrics::new(4.0, 10.0);
        let tags = RideTags::default();
        let fare = FareCalculator::default()
            .calculate(VehicleClass::Sedan, metrics, &tags)
            .expect("fare");
        let ride = Ride::new(NewRide {
            id: RideId(1),
            rider: UserId(10),
            pickup: Location::new(52.52, 13.405),
            destination: Location::new(52.50, 13.44),
            vehicle_class: VehicleClass::Sedan,
            tags,
            estimated_metrics: metrics,
            estimated_fare: fare,
            otp,
            created_at: now(),
        });
        (ride, code)
    }

    fn wrong(code: &PickupCode) -> &'static str {
        if code.expose() == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        assert_eq!(ride.status(), RideStatus::Accepted);
        ride.verify_pickup(code.expose(), 5, now()).expect("pickup");
        assert_eq!(ride.status(), RideStatus::Ongoing);
        let fare = FareCalculator::default()
            .calculate(VehicleClass::Sedan, TripMetrics::new(5.0, 12.0), &RideTags::default())
            .expect("fare");
        ride.complete(TripMetrics::new(5.0, 12.0), fare, now()).expect("complete");
        assert_eq!(ride.status(), RideStatus::Completed);
        assert_eq!(ride.settlement(), Some(SettlementStatus::Unsettled));
        assert_eq!(ride.amount_due().expect("due"), fare.total);
    }

    #[test]
    fn captain_is_never_reassigned() {
        let (mut ride, _) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        let err = ride.assign_captain(UserId(21), now()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { action: RideAction::Match, .. }));
        assert_eq!(ride.captain(), Some(UserId(20)));
    }

    #[test]
    fn wrong_code_keeps_ride_accepted() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        let err = ride.verify_pickup(wrong(&code), 5, now()).unwrap_err();
        assert!(matches!(err, DispatchError::OtpMismatch { remaining: 4, .. }));
        assert_eq!(ride.status(), RideStatus::Accepted);
    }

    #[test]
    fn replayed_code_is_a_mismatch() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        ride.verify_pickup(code.expose(), 5, now()).expect("pickup");
        let err = ride.verify_pickup(code.expose(), 5, now()).unwrap_err();
        assert!(matches!(err, DispatchError::OtpMismatch { .. }));
        assert_eq!(ride.status(), RideStatus::Ongoing);
    }

    #[test]
    fn spent_code_on_completed_ride_is_still_a_mismatch() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        ride.verify_pickup(code.expose(), 5, now()).expect("pickup");
        let fare = ride.estimated_fare;
        ride.complete(TripMetrics::new(4.0, 10.0), fare, now()).expect("complete");
        let err = ride.verify_pickup(code.expose(), 5, now()).unwrap_err();
        assert!(matches!(err, DispatchError::OtpMismatch { remaining: 0, .. }));
        assert_eq!(ride.status(), RideStatus::Completed);
    }

    #[test]
    fn exhausted_attempts_lock_without_cancelling() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        for _ in 0..2 {
            let _ = ride.verify_pickup(wrong(&code), 3, now());
        }
        let err = ride.verify_pickup(wrong(&code), 3, now()).unwrap_err();
        assert!(matches!(err, DispatchError::OtpAttemptsExhausted(_)));
        let err = ride.verify_pickup(code.expose(), 3, now()).unwrap_err();
        assert!(matches!(err, DispatchError::OtpAttemptsExhausted(_)));
        assert_eq!(ride.status(), RideStatus::Accepted);
    }

    #[test]
    fn pickup_before_match_is_invalid() {
        let (mut ride, code) = ride();
        let err = ride.verify_pickup(code.expose(), 5, now()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { from: RideStatus::Pending, .. }));
    }

    #[test]
    fn cancel_returns_captain_and_kills_the_code() {
        let (mut ride, code) = ride();
        ride.assign_captain(UserId(20), now()).expect("match");
        let released = ride.cancel(Some("rider changed plans".into()), now()).expect("cancel");
        assert_eq!(released, Some(UserId(20)));
        let err = ride.verify_pickup(code.expose(), 5, now()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
        let snapshot = ride.snapshot();
        assert_eq!(snapshot.status, RideStatus::Cancelled);
        assert_eq!(snapshot.cancel_reason.as_deref(), Some("rider changed plans"));
    }

    #[test]
    fn terminal_rides_reject_everything_without_side_effects() {
        let (mut ride, _) = ride();
        ride.cancel(None, now()).expect("cancel");
        let before = ride.snapshot();
        let fare = ride.estimated_fare;
        assert!(ride.complete(TripMetrics::new(1.0, 1.0), fare, now()).is_err());
        assert!(ride.cancel(None, now()).is_err());
        assert!(ride.assign_captain(UserId(3), now()).is_err());
        assert!(ride.record_failed_match().is_err());
        assert!(ride.amount_due().is_err());
        assert_eq!(ride.snapshot(), before);
    }

    #[test]
    fn failed_matches_are_counted_while_pending() {
        let (mut ride, _) = ride();
        assert_eq!(ride.record_failed_match().expect("pending"), 1);
        assert_eq!(ride.record_failed_match().expect("pending"), 2);
        assert_eq!(ride.snapshot().match_attempts, 2);
    }
}
