//! Ride dispatch and settlement engine.
//!
//! A ride moves through `pending → accepted → ongoing → completed` (or
//! `cancelled` from the first two states). This crate owns every step of that
//! lifecycle:
//!
//! - [`pricing`]: fare calculator keyed by vehicle class with tag adjustments
//! - [`otp`]: pickup code issuing and single-use verification
//! - [`routing`]: route providers, traffic-adjusted ETAs and the waypoint optimizer
//! - [`matching`]: captain registry with atomic claims and trust-weighted ranking
//! - [`ride`]: the ride state machine
//! - [`settlement`]: payment ledger, provider boundary and reconciliation
//! - [`trust`]: bounded per-user trust scores fed by settlement and reviews
//! - [`review`]: post-ride reviews, unique per (ride, reviewer)
//! - [`dispatcher`]: the engine tying the above together behind one API
//!
//! The crate never installs a `tracing` subscriber; binaries decide how logs
//! are rendered.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod matching;
pub mod otp;
pub mod pricing;
pub mod review;
pub mod ride;
pub mod routing;
pub mod settlement;
pub mod spatial;
pub mod traffic;
pub mod trust;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::DispatchConfig;
pub use dispatcher::{CreatedRide, Dispatcher, DispatcherBuilder, MatchingReport, RideRequest};
pub use error::{DispatchError, DispatchResult};
pub use ride::{RideAction, RideSnapshot, RideStatus};
pub use types::{Location, Money, RideId, RideTags, TagOverrides, TripMetrics, UserId, VehicleClass};
