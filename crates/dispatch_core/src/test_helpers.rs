//! Test helpers for common test setup and utilities.
//!
//! Fixed geography around one city-centre point, a deterministic clock and a
//! scriptable route provider, shared by unit tests, integration tests and
//! benchmarks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::ManualClock;
use crate::matching::{CaptainCapabilities, CaptainProfile};
use crate::routing::{RouteError, RouteLeg, RouteProvider};
use crate::spatial::{haversine_km, offset_km, travel_minutes};
use crate::types::{Location, UserId, VehicleClass};

/// Latitude of the standard test point (Berlin Mitte).
pub const TEST_LAT: f64 = 52.52;
/// Longitude of the standard test point.
pub const TEST_LNG: f64 = 13.405;

pub fn test_location() -> Location {
    Location::new(TEST_LAT, TEST_LNG).with_address("Alexanderplatz")
}

/// A point `north_km` north and `east_km` east of [`test_location`].
pub fn test_offset(north_km: f64, east_km: f64) -> Location {
    offset_km(&test_location(), north_km, east_km)
}

/// 03:00 UTC, a free-flow hour in every built-in traffic profile.
pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(test_start_time()))
}

/// A captain of `class` with every capability, `north_km` from the test point.
pub fn test_captain(id: u64, class: VehicleClass, north_km: f64) -> CaptainProfile {
    CaptainProfile {
        id: UserId(id),
        vehicle_class: class,
        capabilities: CaptainCapabilities::all(),
        location: test_offset(north_km, 0.0),
    }
}

fn key(location: &Location) -> (i64, i64) {
    ((location.lat * 1e6).round() as i64, (location.lng * 1e6).round() as i64)
}

#[derive(Default)]
struct StaticRoutes {
    unreachable: HashSet<(i64, i64)>,
    timeouts: HashMap<(i64, i64), u32>,
    calls: u64,
}

/// Haversine legs at a fixed speed, with scripted failures: points marked
/// unreachable fail every leg touching them; points with pending timeouts
/// time out that many times first.
pub struct StaticRouteProvider {
    speed_kmh: f64,
    state: Mutex<StaticRoutes>,
}

impl StaticRouteProvider {
    pub fn new(speed_kmh: f64) -> Self {
        Self {
            speed_kmh,
            state: Mutex::new(StaticRoutes::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StaticRoutes> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark_unreachable(&self, location: &Location) {
        self.lock().unreachable.insert(key(location));
    }

    pub fn time_out(&self, location: &Location, times: u32) {
        self.lock().timeouts.insert(key(location), times);
    }

    pub fn calls(&self) -> u64 {
        self.lock().calls
    }
}

impl Default for StaticRouteProvider {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl RouteProvider for StaticRouteProvider {
    fn leg(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError> {
        let mut state = self.lock();
        state.calls += 1;
        for end in [key(from), key(to)] {
            if state.unreachable.contains(&end) {
                return Err(RouteError::Unreachable);
            }
            if let Some(remaining) = state.timeouts.get_mut(&end) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RouteError::Timeout);
                }
            }
        }
        let from_ll = from.lat_lng().map_err(|_| RouteError::Unreachable)?;
        let to_ll = to.lat_lng().map_err(|_| RouteError::Unreachable)?;
        let distance_km = haversine_km(from_ll, to_ll);
        Ok(RouteLeg {
            distance_km,
            duration_min: travel_minutes(distance_km, self.speed_kmh),
        })
    }
}

/// Lets a test keep a handle on a provider after boxing it for the engine.
impl RouteProvider for Arc<StaticRouteProvider> {
    fn leg(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError> {
        self.as_ref().leg(from, to)
    }
}
