//! The engine: one entry point for intake, matching, pickup, completion,
//! settlement, reviews and queries.
//!
//! Each ride sits behind its own mutex, so transitions on one ride are
//! serialized while different rides proceed in parallel. The captain pool is
//! shared; exclusivity comes from its atomic claims, not from ride locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::matching::{
    build_matching_algorithm, CaptainPool, CaptainProfile, CaptainStatus, CaptainUpdate, MatchCandidate,
    MatchRequest, MatchingAlgorithm,
};
use crate::otp::{OtpIssuer, PickupCode};
use crate::pricing::FareCalculator;
use crate::review::{Review, ReviewStore, ReviewSubmission};
use crate::ride::{NewRide, Ride, RideAction, RideSnapshot, RideStatus};
use crate::routing::{build_route_provider, OptimizedRoute, RouteOptimizer, RouteProvider, RouteRequest};
use crate::settlement::{Payment, PaymentProvider, Settlement, SettlementReceipt, SimulatedPaymentGateway};
use crate::trust::{TrustAuditEntry, TrustEvent, TrustFeedback, TrustRecord, TrustScores, TrustStore};
use crate::types::{Location, RideId, RideTags, TagOverrides, TripMetrics, UserId};

/// Ride intake payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub rider: UserId,
    pub pickup: Location,
    pub destination: Location,
    /// Parsed case-insensitively; unknown names are rejected.
    pub vehicle_class: String,
    #[serde(default)]
    pub tags: TagOverrides,
}

impl RideRequest {
    pub fn new(rider: UserId, pickup: Location, destination: Location, vehicle_class: impl Into<String>) -> Self {
        Self {
            rider,
            pickup,
            destination,
            vehicle_class: vehicle_class.into(),
            tags: TagOverrides::default(),
        }
    }

    pub fn with_tags(mut self, tags: TagOverrides) -> Self {
        self.tags = tags;
        self
    }
}

/// A freshly created ride plus the pickup code for out-of-band delivery.
/// The snapshot itself never contains the code.
pub struct CreatedRide {
    pub ride: RideSnapshot,
    pub pickup_code: PickupCode,
}

impl fmt::Debug for CreatedRide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedRide")
            .field("ride", &self.ride)
            .field("pickup_code", &self.pickup_code)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRide {
    pub ride: RideId,
    pub captain: UserId,
}

/// Outcome of one matching round, each list ordered by ride id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingReport {
    pub matched: Vec<MatchedRide>,
    pub unmatched: Vec<RideId>,
    pub timed_out: Vec<RideId>,
}

/// A user's rides, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRides {
    /// Pending, accepted or ongoing.
    pub active: Vec<RideSnapshot>,
    /// Completed or cancelled.
    pub past: Vec<RideSnapshot>,
}

/// Whether a miss spends one of the ride's `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Scheduled,
    PoolChange,
}

enum RoundOutcome {
    Matched(UserId),
    Unmatched,
    TimedOut,
    Skipped,
}

/// Wakes the matching loop when the captain pool changes.
#[derive(Default)]
struct PoolSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl PoolSignal {
    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        let mut generation = self.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    fn current(&self) -> u64 {
        *self.lock()
    }

    fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

pub struct DispatcherBuilder {
    config: DispatchConfig,
    clock: Option<Arc<dyn Clock>>,
    route_provider: Option<Box<dyn RouteProvider>>,
    payment_provider: Option<Arc<dyn PaymentProvider>>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            clock: None,
            route_provider: None,
            payment_provider: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the provider selected by `routing.provider`.
    pub fn route_provider(mut self, provider: Box<dyn RouteProvider>) -> Self {
        self.route_provider = Some(provider);
        self
    }

    pub fn payment_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.payment_provider = Some(provider);
        self
    }

    pub fn build(self) -> DispatchResult<Dispatcher> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let provider = match self.route_provider {
            Some(provider) => provider,
            None => build_route_provider(&config.routing)?,
        };
        let payments = self
            .payment_provider
            .unwrap_or_else(|| Arc::new(SimulatedPaymentGateway::default()));
        let trust = Arc::new(TrustStore::new(config.trust, Arc::clone(&clock)));
        let feedback: Arc<dyn TrustFeedback> = trust.clone();
        let settlement = Settlement::new(config.settlement.clone(), payments, feedback, Arc::clone(&clock));

        info!(
            algorithm = ?config.matching.algorithm,
            max_attempts = config.matching.max_attempts,
            "dispatcher ready"
        );

        Ok(Dispatcher {
            fares: FareCalculator::new(config.pricing.clone()),
            otp: OtpIssuer::new(&config.otp),
            optimizer: RouteOptimizer::new(provider, &config.routing),
            pool: CaptainPool::new(Arc::clone(&clock)),
            matcher: build_matching_algorithm(&config.matching),
            trust,
            settlement,
            reviews: ReviewStore::default(),
            rides: RwLock::new(HashMap::new()),
            next_ride_id: AtomicU64::new(1),
            signal: PoolSignal::default(),
            clock,
            config,
        })
    }
}

type RideHandle = Arc<Mutex<Ride>>;

pub struct Dispatcher {
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    fares: FareCalculator,
    otp: OtpIssuer,
    optimizer: RouteOptimizer,
    pool: CaptainPool,
    matcher: Box<dyn MatchingAlgorithm>,
    trust: Arc<TrustStore>,
    settlement: Settlement,
    reviews: ReviewStore,
    rides: RwLock<HashMap<RideId, RideHandle>>,
    next_ride_id: AtomicU64,
    signal: PoolSignal,
}

fn lock_ride(handle: &RideHandle) -> MutexGuard<'_, Ride> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn builder(config: DispatchConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn handle(&self, id: RideId) -> DispatchResult<RideHandle> {
        self.rides
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .ok_or(DispatchError::RideNotFound(id))
    }

    fn handles(&self) -> Vec<RideHandle> {
        self.rides
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    pub fn create_ride(&self, request: RideRequest) -> DispatchResult<CreatedRide> {
        let vehicle_class = request.vehicle_class.parse()?;
        request.pickup.lat_lng()?;
        request.destination.lat_lng()?;
        let tags = RideTags::with_overrides(&request.tags);

        let id = RideId(self.next_ride_id.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.now();
        let estimated_metrics = self.estimate_trip(id, &request.pickup, &request.destination)?;
        let estimated_fare = self.fares.calculate(vehicle_class, estimated_metrics, &tags)?;
        let (otp, pickup_code) = self.otp.issue();

        let ride = Ride::new(NewRide {
            id,
            rider: request.rider,
            pickup: request.pickup,
            destination: request.destination,
            vehicle_class,
            tags,
            estimated_metrics,
            estimated_fare,
            otp,
            created_at: now,
        });
        let snapshot = ride.snapshot();
        self.rides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(Mutex::new(ride)));

        info!(
            ride_id = %id,
            rider = %snapshot.rider,
            class = %vehicle_class,
            fare = %snapshot.estimated_fare,
            "ride created"
        );
        Ok(CreatedRide {
            ride: snapshot,
            pickup_code,
        })
    }

    /// Distance and duration for the quote. Uses the optimized route when it
    /// can be computed and the single-leg estimate otherwise.
    fn estimate_trip(&self, id: RideId, pickup: &Location, destination: &Location) -> DispatchResult<TripMetrics> {
        let now = self.clock.now();
        let request = RouteRequest::single(
            pickup.clone(),
            destination.clone(),
            self.config.routing.consider_traffic,
            now,
        );
        match self.optimizer.optimize(id, &request) {
            Ok(route) => Ok(TripMetrics::new(route.distance_km, f64::from(route.time_estimate_minutes))),
            Err(err) => {
                warn!(ride_id = %id, error = %err, "route optimization failed, using coarse estimate");
                self.optimizer
                    .estimate_leg(pickup, destination, now)
                    .map(|leg| TripMetrics::new(leg.distance_km, leg.duration_min))
                    .ok_or_else(|| DispatchError::Validation("cannot estimate trip for the given locations".into()))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Captain feed
    // -----------------------------------------------------------------------

    pub fn upsert_captain(&self, profile: CaptainProfile, available: bool) -> DispatchResult<CaptainStatus> {
        let status = self.pool.upsert(profile, available)?;
        self.signal.notify();
        Ok(status)
    }

    pub fn set_captain_availability(&self, update: CaptainUpdate) -> DispatchResult<CaptainStatus> {
        let status = self.pool.set_availability(update)?;
        self.signal.notify();
        Ok(status)
    }

    pub fn captain_status(&self, captain: UserId) -> Option<CaptainStatus> {
        self.pool.status(captain)
    }

    pub fn captain_profile(&self, captain: UserId) -> Option<CaptainProfile> {
        self.pool.profile(captain)
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    fn rank(&self, ride: &Ride) -> Vec<MatchCandidate> {
        let captains = self.pool.snapshot_available();
        let request = MatchRequest {
            ride: ride.id(),
            pickup: ride.pickup(),
            vehicle_class: ride.vehicle_class(),
            tags: ride.tags(),
            at: self.clock.now(),
        };
        self.matcher
            .rank(&request, &captains, &self.optimizer, &*self.trust)
    }

    /// One matching pass for a ride the caller has locked. Captains are
    /// claimed in rank order; losing a claim race moves on to the next one.
    /// Only scheduled passes count a miss against the attempt budget.
    fn try_match(&self, ride: &mut Ride, kind: PassKind) -> DispatchResult<UserId> {
        if ride.status() != RideStatus::Pending {
            return Err(DispatchError::InvalidTransition {
                ride: ride.id(),
                from: ride.status(),
                action: RideAction::Match,
            });
        }
        for candidate in self.rank(ride) {
            if !self.pool.claim(candidate.captain) {
                debug!(ride_id = %ride.id(), captain = %candidate.captain, "captain claimed elsewhere");
                continue;
            }
            if let Err(err) = ride.assign_captain(candidate.captain, self.clock.now()) {
                self.pool.release(candidate.captain, None);
                return Err(err);
            }
            info!(
                ride_id = %ride.id(),
                captain = %candidate.captain,
                eta_min = candidate.pickup_eta_min,
                trust = candidate.trust_score,
                score = candidate.score,
                "ride matched"
            );
            return Ok(candidate.captain);
        }

        if kind == PassKind::PoolChange {
            debug!(ride_id = %ride.id(), "no captain after pool change");
            return Err(DispatchError::NoCaptainAvailable(ride.id()));
        }
        let attempts = ride.record_failed_match()?;
        if attempts >= self.config.matching.max_attempts {
            warn!(ride_id = %ride.id(), attempts, "matching attempts exhausted");
            Err(DispatchError::MatchTimeout {
                ride: ride.id(),
                attempts,
            })
        } else {
            debug!(ride_id = %ride.id(), attempts, "no captain available");
            Err(DispatchError::NoCaptainAvailable(ride.id()))
        }
    }

    /// Match one ride now, regardless of how many rounds it has missed.
    pub fn match_ride(&self, id: RideId) -> DispatchResult<UserId> {
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        self.try_match(&mut ride, PassKind::Scheduled)
    }

    fn pending_handles(&self) -> Vec<RideHandle> {
        let max_attempts = self.config.matching.max_attempts;
        let mut pending: Vec<(chrono::DateTime<chrono::Utc>, RideId, RideHandle)> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let (eligible, created_at, id) = {
                    let ride = lock_ride(&handle);
                    (
                        ride.status() == RideStatus::Pending && ride.match_attempts() < max_attempts,
                        ride.created_at(),
                        ride.id(),
                    )
                };
                eligible.then_some((created_at, id, handle))
            })
            .collect();
        pending.sort_by_key(|(created_at, id, _)| (*created_at, *id));
        pending.into_iter().map(|(_, _, handle)| handle).collect()
    }

    pub fn has_pending_rides(&self) -> bool {
        !self.pending_handles().is_empty()
    }

    /// Try every pending ride whose attempts are not exhausted. Each miss
    /// counts toward `matching.max_attempts`.
    pub fn run_matching_round(&self) -> MatchingReport {
        self.run_round(PassKind::Scheduled)
    }

    /// Retry pending rides after the captain pool changed. Misses here leave
    /// the attempt counters alone, so a burst of pool updates cannot time a
    /// ride out.
    pub fn rematch_on_pool_change(&self) -> MatchingReport {
        self.run_round(PassKind::PoolChange)
    }

    fn run_round(&self, kind: PassKind) -> MatchingReport {
        let pending = self.pending_handles();
        if pending.is_empty() {
            return MatchingReport::default();
        }

        let outcomes: Vec<(RideId, RoundOutcome)> = pending
            .par_iter()
            .map(|handle| {
                let mut ride = lock_ride(handle);
                let id = ride.id();
                let outcome = match self.try_match(&mut ride, kind) {
                    Ok(captain) => RoundOutcome::Matched(captain),
                    Err(DispatchError::NoCaptainAvailable(_)) => RoundOutcome::Unmatched,
                    Err(DispatchError::MatchTimeout { .. }) => RoundOutcome::TimedOut,
                    // Cancelled or matched explicitly since the ride was collected.
                    Err(DispatchError::InvalidTransition { .. }) => RoundOutcome::Skipped,
                    Err(err) => {
                        warn!(ride_id = %id, error = %err, "matching failed");
                        RoundOutcome::Unmatched
                    }
                };
                (id, outcome)
            })
            .collect();

        let mut report = MatchingReport::default();
        for (ride, outcome) in outcomes {
            match outcome {
                RoundOutcome::Matched(captain) => report.matched.push(MatchedRide { ride, captain }),
                RoundOutcome::Unmatched => report.unmatched.push(ride),
                RoundOutcome::TimedOut => report.timed_out.push(ride),
                RoundOutcome::Skipped => {}
            }
        }
        report.matched.sort_by_key(|matched| matched.ride);
        report.unmatched.sort();
        report.timed_out.sort();
        info!(
            ?kind,
            captains = self.pool.len(),
            matched = report.matched.len(),
            unmatched = report.unmatched.len(),
            timed_out = report.timed_out.len(),
            "matching round finished"
        );
        report
    }

    /// Run a scheduled matching round on a background thread every
    /// `matching.round_interval_ms`. Pool changes in between trigger an extra
    /// pass that does not spend attempts.
    pub fn spawn_matching_loop(self: &Arc<Self>) -> DispatchResult<MatchingLoop> {
        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::clone(self);
        let thread_stop = Arc::clone(&stop);
        let interval = Duration::from_millis(self.config.matching.round_interval_ms);
        let handle = std::thread::Builder::new()
            .name("dispatch-matching".into())
            .spawn(move || {
                let mut seen = dispatcher.signal.current();
                let mut next_round = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now >= next_round {
                        if dispatcher.has_pending_rides() {
                            dispatcher.run_matching_round();
                        }
                        next_round = now + interval;
                    } else if dispatcher.has_pending_rides() {
                        dispatcher.rematch_on_pool_change();
                    }
                    let wait = next_round.saturating_duration_since(Instant::now());
                    seen = dispatcher.signal.wait_for_change(seen, wait);
                }
                debug!("matching loop stopped");
            })
            .map_err(|err| DispatchError::Config(format!("failed to start matching loop: {err}")))?;
        Ok(MatchingLoop {
            stop,
            dispatcher: Arc::clone(self),
            handle: Some(handle),
        })
    }

    // -----------------------------------------------------------------------
    // Pickup, completion, cancellation
    // -----------------------------------------------------------------------

    pub fn verify_pickup(&self, id: RideId, code: &str) -> DispatchResult<RideSnapshot> {
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        match ride.verify_pickup(code, self.config.otp.max_attempts, self.clock.now()) {
            Ok(()) => {
                info!(ride_id = %id, "pickup verified");
                Ok(ride.snapshot())
            }
            Err(err) => {
                warn!(ride_id = %id, error = %err, "pickup verification rejected");
                Err(err)
            }
        }
    }

    /// End the trip with measured metrics and settle it. A failed payment is
    /// not an error here: the receipt reports it and the ride is flagged for
    /// reconciliation.
    pub fn complete_ride(&self, id: RideId, metrics: TripMetrics) -> DispatchResult<SettlementReceipt> {
        metrics.validate()?;
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        if ride.status() != RideStatus::Ongoing {
            return Err(DispatchError::InvalidTransition {
                ride: id,
                from: ride.status(),
                action: RideAction::Complete,
            });
        }
        let final_fare = self.fares.calculate(ride.vehicle_class(), metrics, ride.tags())?;
        ride.complete(metrics, final_fare, self.clock.now())?;
        info!(ride_id = %id, fare = %final_fare.total, distance_km = metrics.distance_km, "ride completed");

        if let Some(captain) = ride.captain() {
            self.pool.release(captain, Some(ride.destination().clone()));
            self.signal.notify();
        }
        self.settlement.settle(&mut ride)
    }

    pub fn cancel_ride(&self, id: RideId, reason: Option<String>) -> DispatchResult<RideSnapshot> {
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        let captain = ride.cancel(reason, self.clock.now())?;
        if let Some(captain) = captain {
            self.pool.release(captain, None);
            self.signal.notify();
        }
        info!(ride_id = %id, "ride cancelled");
        Ok(ride.snapshot())
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Idempotent: a settled ride returns its existing receipt.
    pub fn settle(&self, id: RideId) -> DispatchResult<SettlementReceipt> {
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        self.settlement.settle(&mut ride)
    }

    pub fn reconcile_payment(&self, id: RideId) -> DispatchResult<SettlementReceipt> {
        let handle = self.handle(id)?;
        let mut ride = lock_ride(&handle);
        self.settlement.reconcile(&mut ride)
    }

    pub fn payment(&self, id: RideId) -> Option<Payment> {
        self.settlement.ledger().get(id)
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.settlement.ledger().payments()
    }

    // -----------------------------------------------------------------------
    // Reviews and trust
    // -----------------------------------------------------------------------

    pub fn submit_review(&self, submission: ReviewSubmission) -> DispatchResult<Review> {
        let handle = self.handle(submission.ride_id)?;
        let ride = lock_ride(&handle);
        submission.validate_for(&ride)?;
        let review = self.reviews.insert(submission, self.clock.now())?;
        drop(ride);

        let record = self.trust.record(TrustEvent::Reviewed {
            ride: review.ride_id,
            reviewer: review.reviewer,
            target: review.target,
            rating: review.rating,
        });
        info!(
            ride_id = %review.ride_id,
            reviewer = %review.reviewer,
            target = %review.target,
            rating = review.rating,
            trust = record.score,
            "review applied"
        );
        Ok(review)
    }

    pub fn reviews_for_ride(&self, id: RideId) -> Vec<Review> {
        self.reviews.for_ride(id)
    }

    pub fn trust_score(&self, user: UserId) -> f64 {
        self.trust.score(user)
    }

    pub fn trust_record(&self, user: UserId) -> Option<TrustRecord> {
        self.trust.record_for(user)
    }

    pub fn trust_records(&self) -> Vec<TrustRecord> {
        self.trust.records()
    }

    pub fn trust_audit(&self) -> Vec<TrustAuditEntry> {
        self.trust.audit_trail()
    }

    // -----------------------------------------------------------------------
    // Queries and routes
    // -----------------------------------------------------------------------

    pub fn ride(&self, id: RideId) -> DispatchResult<RideSnapshot> {
        let handle = self.handle(id)?;
        let ride = lock_ride(&handle);
        Ok(ride.snapshot())
    }

    pub fn rides(&self) -> Vec<RideSnapshot> {
        let mut rides: Vec<_> = self
            .handles()
            .iter()
            .map(|handle| lock_ride(handle).snapshot())
            .collect();
        rides.sort_by_key(|ride| ride.id);
        rides
    }

    /// Rides where `user` is the rider or the captain.
    pub fn rides_for_user(&self, user: UserId) -> UserRides {
        let mut rides: Vec<RideSnapshot> = self
            .handles()
            .iter()
            .filter_map(|handle| {
                let ride = lock_ride(handle);
                ride.involves(user).then(|| ride.snapshot())
            })
            .collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let (past, active): (Vec<_>, Vec<_>) = rides.into_iter().partition(|ride| ride.status.is_terminal());
        UserRides { active, past }
    }

    /// The route record computed for a ride request, if cached.
    pub fn optimized_route(&self, id: RideId) -> Option<OptimizedRoute> {
        self.optimizer.cached(id)
    }

    /// Optimize a multi-stop request. The record is stored under `id` and
    /// replaced when called again with different inputs.
    pub fn optimize_route(&self, id: RideId, request: &RouteRequest) -> DispatchResult<OptimizedRoute> {
        self.optimizer.optimize(id, request)
    }
}

/// Background matching thread. Stops on [`MatchingLoop::stop`] or drop.
pub struct MatchingLoop {
    stop: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
    handle: Option<JoinHandle<()>>,
}

impl MatchingLoop {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.dispatcher.signal.notify();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("matching loop thread panicked");
            }
        }
    }
}

impl Drop for MatchingLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
