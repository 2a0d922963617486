//! Post-ride reviews. One review per (ride, reviewer); the store refuses the
//! second one and stays unchanged.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DispatchError;
use crate::ride::{Ride, RideStatus};
use crate::types::{RideId, UserId};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const MAX_COMMENT_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub ride_id: RideId,
    pub reviewer: UserId,
    pub target: UserId,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ReviewSubmission {
    /// Field checks that need no ride.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(DispatchError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {}",
                self.rating
            )));
        }
        if self.reviewer == self.target {
            return Err(DispatchError::Validation("users cannot review themselves".into()));
        }
        if let Some(comment) = &self.comment {
            if comment.chars().count() > MAX_COMMENT_CHARS {
                return Err(DispatchError::Validation(format!(
                    "comment exceeds {MAX_COMMENT_CHARS} characters"
                )));
            }
        }
        Ok(())
    }

    /// The ride must be completed, and reviewer and target must be its rider
    /// and captain in either direction.
    pub fn validate_for(&self, ride: &Ride) -> Result<(), DispatchError> {
        self.validate()?;
        if ride.id() != self.ride_id {
            return Err(DispatchError::Validation(format!(
                "review for {} submitted against {}",
                self.ride_id,
                ride.id()
            )));
        }
        if ride.status() != RideStatus::Completed {
            return Err(DispatchError::Validation(format!(
                "{} is {}; only completed rides can be reviewed",
                ride.id(),
                ride.status()
            )));
        }
        let rider = ride.rider();
        let captain = ride.captain();
        let pair_ok = (self.reviewer == rider && Some(self.target) == captain)
            || (Some(self.reviewer) == captain && self.target == rider);
        if !pair_ok {
            return Err(DispatchError::Validation(format!(
                "{} and {} are not the participants of {}",
                self.reviewer,
                self.target,
                ride.id()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub ride_id: RideId,
    pub reviewer: UserId,
    pub target: UserId,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ReviewStore {
    reviews: Mutex<HashMap<(RideId, UserId), Review>>,
}

impl ReviewStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<(RideId, UserId), Review>> {
        self.reviews.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert unless the (ride, reviewer) pair already exists.
    pub fn insert(&self, submission: ReviewSubmission, at: DateTime<Utc>) -> Result<Review, DispatchError> {
        let key = (submission.ride_id, submission.reviewer);
        match self.lock().entry(key) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateReview {
                ride: submission.ride_id,
                reviewer: submission.reviewer,
            }),
            Entry::Vacant(slot) => {
                let review = Review {
                    ride_id: submission.ride_id,
                    reviewer: submission.reviewer,
                    target: submission.target,
                    rating: submission.rating,
                    comment: submission.comment,
                    created_at: at,
                };
                slot.insert(review.clone());
                debug!(ride_id = %review.ride_id, reviewer = %review.reviewer, rating = review.rating, "review stored");
                Ok(review)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_ride(&self, ride: RideId) -> Vec<Review> {
        let mut reviews: Vec<_> = self
            .lock()
            .values()
            .filter(|review| review.ride_id == ride)
            .cloned()
            .collect();
        reviews.sort_by_key(|review| review.reviewer);
        reviews
    }

    /// Reviews received by `target`, oldest first.
    pub fn about(&self, target: UserId) -> Vec<Review> {
        let mut reviews: Vec<_> = self
            .lock()
            .values()
            .filter(|review| review.target == target)
            .cloned()
            .collect();
        reviews.sort_by_key(|review| (review.created_at, review.ride_id));
        reviews
    }
}
