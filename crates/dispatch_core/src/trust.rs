//! Per-user trust scores in `[0, 100]`.
//!
//! Settlement and review ingestion never touch scores directly; they send
//! [`TrustEvent`]s through [`TrustFeedback`]. The store applies the update
//! rule, clamps the result and appends an audit entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::DispatchError;
use crate::types::{RideId, UserId};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Score given to a user the first time an event touches them.
    pub neutral_score: f64,
    /// Added to rider and captain after a successfully paid ride.
    pub completion_reward: f64,
    /// Multiplied by `rating - 3`, so a 5 adds twice this and a 1 removes it twice.
    pub review_weight: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            neutral_score: 50.0,
            completion_reward: 1.0,
            review_weight: 2.0,
        }
    }
}

impl TrustConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.neutral_score) {
            return Err(DispatchError::Config(format!(
                "neutral trust score {} outside [0, 100]",
                self.neutral_score
            )));
        }
        if !self.completion_reward.is_finite() || !self.review_weight.is_finite() {
            return Err(DispatchError::Config("trust adjustments must be finite".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustEvent {
    RideCompleted {
        ride: RideId,
        user: UserId,
    },
    Reviewed {
        ride: RideId,
        reviewer: UserId,
        target: UserId,
        rating: u8,
    },
}

impl TrustEvent {
    pub fn subject(&self) -> UserId {
        match self {
            TrustEvent::RideCompleted { user, .. } => *user,
            TrustEvent::Reviewed { target, .. } => *target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub user: UserId,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAuditEntry {
    pub event: TrustEvent,
    pub before: f64,
    pub after: f64,
    pub at: DateTime<Utc>,
}

/// Write side of the trust loop.
pub trait TrustFeedback: Send + Sync {
    fn record(&self, event: TrustEvent) -> TrustRecord;
}

/// Read side used by matching.
pub trait TrustScores: Send + Sync {
    fn score(&self, user: UserId) -> f64;
}

/// Clamp into `[0, 100]`; non-finite values collapse to `fallback`.
pub fn clamp_score(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_SCORE, MAX_SCORE)
    } else {
        fallback.clamp(MIN_SCORE, MAX_SCORE)
    }
}

#[derive(Default)]
struct TrustState {
    records: HashMap<UserId, TrustRecord>,
    audit: Vec<TrustAuditEntry>,
}

pub struct TrustStore {
    config: TrustConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<TrustState>,
}

impl TrustStore {
    pub fn new(config: TrustConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(TrustState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrustState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn delta_for(&self, event: &TrustEvent) -> f64 {
        match event {
            TrustEvent::RideCompleted { .. } => self.config.completion_reward,
            TrustEvent::Reviewed { rating, .. } => {
                (f64::from(*rating) - 3.0) * self.config.review_weight
            }
        }
    }

    /// Existing record, if any. Lookups never create records.
    pub fn record_for(&self, user: UserId) -> Option<TrustRecord> {
        self.lock().records.get(&user).copied()
    }

    pub fn audit_trail(&self) -> Vec<TrustAuditEntry> {
        self.lock().audit.clone()
    }

    pub fn records(&self) -> Vec<TrustRecord> {
        let mut records: Vec<_> = self.lock().records.values().copied().collect();
        records.sort_by_key(|record| record.user);
        records
    }

    /// Apply a raw delta. The whole read-modify-write happens under one lock,
    /// so concurrent updates for the same user never lose increments.
    fn apply(&self, event: TrustEvent, delta: f64) -> TrustRecord {
        let now = self.clock.now();
        let neutral = self.config.neutral_score;
        let user = event.subject();
        let mut state = self.lock();
        let record = state.records.entry(user).or_insert(TrustRecord {
            user,
            score: neutral,
            last_updated: now,
        });
        let before = record.score;
        let after = clamp_score(before + delta, before);
        record.score = after;
        record.last_updated = now;
        let updated = *record;
        state.audit.push(TrustAuditEntry {
            event,
            before,
            after,
            at: now,
        });
        debug!(user = %user, before, after, "trust score updated");
        updated
    }
}

impl TrustFeedback for TrustStore {
    fn record(&self, event: TrustEvent) -> TrustRecord {
        let delta = self.delta_for(&event);
        self.apply(event, delta)
    }
}

impl TrustScores for TrustStore {
    fn score(&self, user: UserId) -> f64 {
        self.record_for(user)
            .map(|record| record.score)
            .unwrap_or(self.config.neutral_score)
    }
}
