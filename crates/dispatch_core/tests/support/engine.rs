use std::sync::Arc;

use dispatch_core::clock::ManualClock;
use dispatch_core::matching::CaptainStatus;
use dispatch_core::settlement::{PaymentProvider, SettlementReceipt, SimulatedPaymentGateway};
use dispatch_core::test_helpers::{manual_clock, test_captain, test_location, test_offset, StaticRouteProvider};
use dispatch_core::{
    CreatedRide, DispatchConfig, Dispatcher, RideId, RideRequest, TripMetrics, UserId, VehicleClass,
};

/// A dispatcher wired to a manual clock, a scriptable route provider and the
/// in-memory payment gateway, with handles kept on all three.
pub struct TestEngine {
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<ManualClock>,
    pub routes: Arc<StaticRouteProvider>,
    pub gateway: Arc<SimulatedPaymentGateway>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let gateway = Arc::new(SimulatedPaymentGateway::default());
        Self::build(config, gateway.clone(), gateway)
    }

    /// Charges go to `provider`; `gateway` is left unwired.
    pub fn with_payment_provider(config: DispatchConfig, provider: Arc<dyn PaymentProvider>) -> Self {
        Self::build(config, provider, Arc::new(SimulatedPaymentGateway::default()))
    }

    fn build(
        config: DispatchConfig,
        provider: Arc<dyn PaymentProvider>,
        gateway: Arc<SimulatedPaymentGateway>,
    ) -> Self {
        let clock = manual_clock();
        let routes = Arc::new(StaticRouteProvider::default());
        let dispatcher = Dispatcher::builder(config)
            .clock(clock.clone())
            .route_provider(Box::new(Arc::clone(&routes)))
            .payment_provider(provider)
            .build()
            .expect("dispatcher should build");
        Self {
            dispatcher: Arc::new(dispatcher),
            clock,
            routes,
            gateway,
        }
    }

    pub fn add_captain(&self, id: u64, class: VehicleClass, north_km: f64) {
        let status = self
            .dispatcher
            .upsert_captain(test_captain(id, class, north_km), true)
            .expect("captain should register");
        assert_eq!(status, CaptainStatus::Available);
    }

    pub fn ride_request(&self, rider: u64, class: &str) -> RideRequest {
        RideRequest::new(UserId(rider), test_location(), test_offset(5.0, 0.0), class)
    }

    pub fn request_ride(&self, rider: u64, class: &str) -> CreatedRide {
        self.dispatcher
            .create_ride(self.ride_request(rider, class))
            .expect("ride should be created")
    }

    /// A mini ride for `rider`, matched to a fresh mini captain `captain`
    /// standing 1 km away.
    pub fn accepted_ride(&self, rider: u64, captain: u64) -> CreatedRide {
        self.add_captain(captain, VehicleClass::Mini, 1.0);
        let created = self.request_ride(rider, "mini");
        let matched = self
            .dispatcher
            .match_ride(created.ride.id)
            .expect("ride should match");
        assert_eq!(matched, UserId(captain));
        created
    }

    pub fn ongoing_ride(&self, rider: u64, captain: u64) -> RideId {
        let created = self.accepted_ride(rider, captain);
        self.dispatcher
            .verify_pickup(created.ride.id, created.pickup_code.expose())
            .expect("pickup should verify");
        created.ride.id
    }

    pub fn completed_ride(&self, rider: u64, captain: u64) -> (RideId, SettlementReceipt) {
        let id = self.ongoing_ride(rider, captain);
        let receipt = self
            .dispatcher
            .complete_ride(id, TripMetrics::new(5.0, 12.0))
            .expect("ride should complete");
        (id, receipt)
    }
}
