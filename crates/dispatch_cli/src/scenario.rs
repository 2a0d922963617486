//! Seeded demo scenario: captains and riders scattered around a city centre,
//! driven through matching, pickup, completion, settlement and reviews.
//!
//! A fraction of riders carry cards the gateway declines at first; those
//! rides end up flagged and are reconciled once the decline is lifted.

use std::sync::Arc;

use dispatch_core::matching::{CaptainCapabilities, CaptainProfile};
use dispatch_core::review::ReviewSubmission;
use dispatch_core::settlement::SimulatedPaymentGateway;
use dispatch_core::spatial::offset_km;
use dispatch_core::{
    DispatchConfig, DispatchError, Dispatcher, Location, RideId, RideRequest, RideStatus, TagOverrides, TripMetrics,
    UserId, VehicleClass,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

/// Default centre: Bengaluru MG Road (approx).
const CENTER_LAT: f64 = 12.9756;
const CENTER_LNG: f64 = 77.6050;

/// Captain ids start here so they never collide with rider ids.
const CAPTAIN_ID_BASE: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub num_riders: usize,
    pub num_captains: usize,
    pub seed: u64,
    /// Riders and captains are placed within this radius of the centre.
    pub radius_km: f64,
    /// Share of riders whose first charge is declined.
    pub decline_rate: f64,
    /// Upper bound on matching rounds before pending rides are cancelled.
    pub max_rounds: usize,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            num_riders: 200,
            num_captains: 60,
            seed: 42,
            radius_km: 6.0,
            decline_rate: 0.05,
            max_rounds: 50,
        }
    }
}

impl ScenarioParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_riders(mut self, riders: usize) -> Self {
        self.num_riders = riders;
        self
    }

    pub fn with_captains(mut self, captains: usize) -> Self {
        self.num_captains = captains;
        self
    }
}

/// Counters collected while the scenario runs.
#[derive(Debug, Clone, Default)]
pub struct ScenarioStats {
    pub rounds: usize,
    pub pickups_rejected: usize,
    pub reviews: usize,
    pub reconciled: usize,
    pub cancelled_unmatched: usize,
}

fn random_point(rng: &mut StdRng, center: &Location, radius_km: f64) -> Location {
    let distance = radius_km * rng.gen::<f64>().sqrt();
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    offset_km(center, distance * bearing.cos(), distance * bearing.sin())
}

fn random_class(rng: &mut StdRng) -> VehicleClass {
    VehicleClass::ALL[rng.gen_range(0..VehicleClass::ALL.len())]
}

fn random_capabilities(rng: &mut StdRng) -> CaptainCapabilities {
    CaptainCapabilities {
        pets_allowed: rng.gen_bool(0.5),
        no_smoking: rng.gen_bool(0.9),
        ac_vehicle: rng.gen_bool(0.8),
        ladies_only: rng.gen_bool(0.2),
    }
}

fn random_tags(rng: &mut StdRng) -> TagOverrides {
    TagOverrides {
        pets_allowed: rng.gen_bool(0.15).then_some(true),
        ac_vehicle: rng.gen_bool(0.3).then_some(false),
        express_route: rng.gen_bool(0.1).then_some(true),
        ladies_only: rng.gen_bool(0.05).then_some(true),
        ..TagOverrides::default()
    }
}

pub struct Scenario {
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Arc<SimulatedPaymentGateway>,
    pub stats: ScenarioStats,
    params: ScenarioParams,
    rng: StdRng,
    declined: Vec<RideId>,
}

impl Scenario {
    pub fn build(config: DispatchConfig, params: ScenarioParams) -> Result<Self, DispatchError> {
        let gateway = Arc::new(SimulatedPaymentGateway::default());
        let dispatcher = Dispatcher::builder(config)
            .payment_provider(gateway.clone())
            .build()?;
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            gateway,
            stats: ScenarioStats::default(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
            declined: Vec::new(),
        })
    }

    /// Run the whole scenario to the point where every ride is terminal.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        let center = Location::new(CENTER_LAT, CENTER_LNG).with_address("city centre");
        self.spawn_captains(&center)?;
        let mut codes = self.spawn_riders(&center)?;

        while self.stats.rounds < self.params.max_rounds && self.dispatcher.has_pending_rides() {
            self.stats.rounds += 1;
            let report = self.dispatcher.run_matching_round();
            if report.matched.is_empty() {
                debug!(round = self.stats.rounds, "no progress, stopping matching");
                break;
            }
            for matched in report.matched {
                let Some(position) = codes.iter().position(|(id, _)| *id == matched.ride) else {
                    continue;
                };
                let (ride, code) = codes.swap_remove(position);
                self.drive(ride, matched.captain, &code)?;
            }
        }

        self.cancel_leftovers()?;
        self.reconcile_declined()?;
        info!(
            rounds = self.stats.rounds,
            reviews = self.stats.reviews,
            reconciled = self.stats.reconciled,
            cancelled = self.stats.cancelled_unmatched,
            "scenario finished"
        );
        Ok(())
    }

    fn spawn_captains(&mut self, center: &Location) -> Result<(), DispatchError> {
        for i in 0..self.params.num_captains {
            let profile = CaptainProfile {
                id: UserId(CAPTAIN_ID_BASE + i as u64),
                vehicle_class: random_class(&mut self.rng),
                capabilities: random_capabilities(&mut self.rng),
                location: random_point(&mut self.rng, center, self.params.radius_km),
            };
            self.dispatcher.upsert_captain(profile, true)?;
        }
        Ok(())
    }

    /// Create every ride up front and keep the pickup codes the riders would
    /// receive out of band.
    fn spawn_riders(&mut self, center: &Location) -> Result<Vec<(RideId, String)>, DispatchError> {
        let mut codes = Vec::with_capacity(self.params.num_riders);
        for rider in 1..=self.params.num_riders as u64 {
            let pickup = random_point(&mut self.rng, center, self.params.radius_km);
            let destination = random_point(&mut self.rng, center, self.params.radius_km);
            let class = random_class(&mut self.rng);
            let request = RideRequest::new(UserId(rider), pickup, destination, class.as_str())
                .with_tags(random_tags(&mut self.rng));
            let created = self.dispatcher.create_ride(request)?;
            if self.rng.gen_bool(self.params.decline_rate) {
                self.gateway.decline_ride(created.ride.id, true);
                self.declined.push(created.ride.id);
            }
            codes.push((created.ride.id, created.pickup_code.expose().to_string()));
        }
        Ok(codes)
    }

    /// Pickup, trip and reviews for one matched ride.
    fn drive(&mut self, ride: RideId, captain: UserId, code: &str) -> Result<(), DispatchError> {
        // Occasionally the captain mistypes the code first.
        if self.rng.gen_bool(0.1) {
            let typo = if code == "000000" { "999999" } else { "000000" };
            if let Err(err) = self.dispatcher.verify_pickup(ride, typo) {
                debug!(ride_id = %ride, error = %err, "pickup code retyped");
                self.stats.pickups_rejected += 1;
            }
        }
        let snapshot = match self.dispatcher.verify_pickup(ride, code) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(ride_id = %ride, error = %err, "pickup failed, cancelling");
                self.dispatcher.cancel_ride(ride, Some("pickup failed".into()))?;
                return Ok(());
            }
        };

        let estimate = snapshot.estimated_metrics;
        let actual = TripMetrics::new(
            estimate.distance_km * self.rng.gen_range(0.95..1.25),
            estimate.duration_min * self.rng.gen_range(0.9..1.4),
        );
        self.dispatcher.complete_ride(ride, actual)?;

        let rider = snapshot.rider;
        let rider_rating = self.rng.gen_range(1..=5);
        let captain_rating = self.rng.gen_range(3..=5);
        for (reviewer, target, rating) in [(rider, captain, rider_rating), (captain, rider, captain_rating)] {
            if self.rng.gen_bool(0.7) {
                self.dispatcher.submit_review(ReviewSubmission {
                    ride_id: ride,
                    reviewer,
                    target,
                    rating,
                    comment: None,
                })?;
                self.stats.reviews += 1;
            }
        }
        Ok(())
    }

    fn cancel_leftovers(&mut self) -> Result<(), DispatchError> {
        for ride in self.dispatcher.rides() {
            if ride.status == RideStatus::Pending {
                self.dispatcher.cancel_ride(ride.id, Some("no captain found".into()))?;
                self.stats.cancelled_unmatched += 1;
            }
        }
        Ok(())
    }

    fn reconcile_declined(&mut self) -> Result<(), DispatchError> {
        for ride in std::mem::take(&mut self.declined) {
            self.gateway.decline_ride(ride, false);
            let completed = self.dispatcher.ride(ride)?.status == RideStatus::Completed;
            if !completed {
                continue;
            }
            match self.dispatcher.reconcile_payment(ride) {
                Ok(receipt) if !receipt.replayed => self.stats.reconciled += 1,
                Ok(_) => {}
                Err(err) => warn!(ride_id = %ride, error = %err, "reconciliation failed"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(seed: u64) -> Scenario {
        let params = ScenarioParams::default()
            .with_seed(seed)
            .with_riders(40)
            .with_captains(15);
        let mut scenario = Scenario::build(DispatchConfig::default(), params).expect("scenario");
        scenario.run().expect("run");
        scenario
    }

    #[test]
    fn every_ride_ends_terminal() {
        let scenario = run(7);
        let rides = scenario.dispatcher.rides();
        assert_eq!(rides.len(), 40);
        assert!(rides.iter().all(|ride| ride.status.is_terminal()));
    }

    #[test]
    fn completed_rides_are_paid_once() {
        let scenario = run(11);
        let completed = scenario
            .dispatcher
            .rides()
            .into_iter()
            .filter(|ride| ride.status == RideStatus::Completed)
            .count() as u64;
        assert_eq!(scenario.gateway.charges(), completed);
    }

    #[test]
    fn same_seed_gives_same_requests() {
        let requests = |scenario: &Scenario| {
            scenario
                .dispatcher
                .rides()
                .into_iter()
                .map(|ride| (ride.id, ride.vehicle_class, ride.tags, ride.pickup, ride.destination))
                .collect::<Vec<_>>()
        };
        assert_eq!(requests(&run(3)), requests(&run(3)));
    }
}
