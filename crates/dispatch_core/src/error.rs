use thiserror::Error;

use crate::ride::{RideAction, RideStatus};
use crate::types::{RideId, UserId};

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Every failure the engine reports. Nothing in the crate panics on bad
/// input; callers get one of these instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown vehicle class `{0}`")]
    InvalidVehicleClass(String),

    #[error("cannot {action} {ride} while it is {from}")]
    InvalidTransition {
        ride: RideId,
        from: RideStatus,
        action: RideAction,
    },

    #[error("{0} not found")]
    RideNotFound(RideId),

    #[error("no captain available for {0}")]
    NoCaptainAvailable(RideId),

    #[error("matching for {ride} gave up after {attempts} attempts")]
    MatchTimeout { ride: RideId, attempts: u32 },

    #[error("pickup code rejected for {ride} ({remaining} attempts left)")]
    OtpMismatch { ride: RideId, remaining: u32 },

    #[error("pickup code attempts exhausted for {0}")]
    OtpAttemptsExhausted(RideId),

    #[error("waypoint {index} is unreachable")]
    UnreachableWaypoint { index: usize },

    #[error("route provider timed out after {attempts} attempts")]
    RouteTimeout { attempts: u32 },

    #[error("payment for {ride} failed: {reason}")]
    PaymentFailure { ride: RideId, reason: String },

    #[error("{ride} was already reviewed by {reviewer}")]
    DuplicateReview { ride: RideId, reviewer: UserId },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DispatchError {
    /// Whether the same call may succeed if repeated later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoCaptainAvailable(_)
                | DispatchError::RouteTimeout { .. }
                | DispatchError::PaymentFailure { .. }
        )
    }
}
