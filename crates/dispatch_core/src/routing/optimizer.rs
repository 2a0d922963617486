//! Multi-stop route optimization with a per-request cache.
//!
//! The visiting order is an exact shortest-time search over
//! `(current waypoint, visited set)` states. The route starts at the first
//! pickup, and drops become eligible only after every pickup is visited.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use pathfinding::prelude::{bfs_reach, dijkstra};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::matching::PickupEtaEstimator;
use crate::traffic::TrafficProfile;
use crate::types::{Location, RideId};

use super::{coarse_leg, RouteError, RouteLeg, RouteProvider, RoutingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub pickups: Vec<Location>,
    pub drops: Vec<Location>,
    pub consider_traffic: bool,
    pub depart_at: DateTime<Utc>,
}

impl RouteRequest {
    pub fn single(pickup: Location, drop: Location, consider_traffic: bool, depart_at: DateTime<Utc>) -> Self {
        Self {
            pickups: vec![pickup],
            drops: vec![drop],
            consider_traffic,
            depart_at,
        }
    }

    fn waypoints(&self) -> Vec<&Location> {
        self.pickups.iter().chain(self.drops.iter()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Pickup,
    Drop,
}

/// Position of a stop in the request's pickup or drop list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointRef {
    pub kind: WaypointKind,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedRoute {
    pub request_id: RideId,
    pub pickup_points: Vec<Location>,
    pub drop_points: Vec<Location>,
    pub order: Vec<WaypointRef>,
    pub optimized_route: Vec<Location>,
    pub distance_km: f64,
    pub free_flow_minutes: f64,
    pub time_estimate_minutes: u32,
    pub traffic_considered: bool,
    pub computed_at: DateTime<Utc>,
}

struct CachedRoute {
    request: RouteRequest,
    route: OptimizedRoute,
}

pub struct RouteOptimizer {
    provider: Box<dyn RouteProvider>,
    traffic: TrafficProfile,
    average_speed_kmh: f64,
    consider_traffic: bool,
    timeout_retries: u32,
    max_waypoints: usize,
    cache: Mutex<LruCache<RideId, CachedRoute>>,
}

impl RouteOptimizer {
    pub fn new(provider: Box<dyn RouteProvider>, config: &RoutingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            traffic: TrafficProfile::from_kind(&config.traffic),
            average_speed_kmh: config.average_speed_kmh,
            consider_traffic: config.consider_traffic,
            timeout_retries: config.timeout_retries,
            max_waypoints: config.max_waypoints,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<RideId, CachedRoute>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last computed route for a request, if still cached.
    pub fn cached(&self, request_id: RideId) -> Option<OptimizedRoute> {
        self.cache().peek(&request_id).map(|entry| entry.route.clone())
    }

    /// Optimize `request`, reusing the cached record when the inputs are
    /// unchanged and replacing it otherwise.
    pub fn optimize(&self, request_id: RideId, request: &RouteRequest) -> Result<OptimizedRoute, DispatchError> {
        if let Some(entry) = self.cache().get(&request_id) {
            if entry.request == *request {
                return Ok(entry.route.clone());
            }
        }

        let route = self.compute(request_id, request)?;
        self.cache().put(
            request_id,
            CachedRoute {
                request: request.clone(),
                route: route.clone(),
            },
        );
        debug!(
            request = %request_id,
            stops = route.order.len(),
            minutes = route.time_estimate_minutes,
            "route optimized"
        );
        Ok(route)
    }

    fn compute(&self, request_id: RideId, request: &RouteRequest) -> Result<OptimizedRoute, DispatchError> {
        if request.pickups.is_empty() || request.drops.is_empty() {
            return Err(DispatchError::Validation(
                "a route needs at least one pickup and one drop".into(),
            ));
        }
        let waypoints = request.waypoints();
        let n = waypoints.len();
        if n > self.max_waypoints {
            return Err(DispatchError::Validation(format!(
                "{n} waypoints exceed the limit of {}",
                self.max_waypoints
            )));
        }
        for (index, point) in waypoints.iter().enumerate() {
            if point.lat_lng().is_err() {
                return Err(DispatchError::UnreachableWaypoint { index });
            }
        }

        let legs = self.leg_matrix(&waypoints)?;
        let legs = &legs;
        let pickup_count = request.pickups.len();
        let pickup_mask: u32 = (1u32 << pickup_count) - 1;
        let full_mask: u32 = (1u32 << n) - 1;

        // Every stop must be reachable from the start over the leg graph.
        let reachable: Vec<usize> = bfs_reach(0usize, |&from| {
            (0..n).filter(move |&to| to != from && legs[from][to].is_some())
        })
        .collect();
        if let Some(index) = (0..n).find(|index| !reachable.contains(index)) {
            return Err(DispatchError::UnreachableWaypoint { index });
        }

        let search = dijkstra(
            &(0usize, 1u32),
            |&(current, visited)| {
                (0..n)
                    .filter(|&next| visited & (1 << next) == 0)
                    .filter(|&next| next < pickup_count || visited & pickup_mask == pickup_mask)
                    .filter_map(|next| {
                        legs[current][next]
                            .map(|leg| ((next, visited | (1 << next)), seconds(leg.duration_min)))
                    })
                    .collect::<Vec<_>>()
            },
            |&(_, visited)| visited == full_mask,
        );

        let Some((path, _)) = search else {
            // Every stop is reachable, but no ordering honours pickups-before-drops.
            let index = (pickup_count..n)
                .find(|&drop| (0..pickup_count).all(|pickup| legs[pickup][drop].is_none()))
                .unwrap_or(n - 1);
            return Err(DispatchError::UnreachableWaypoint { index });
        };

        let stops: Vec<usize> = path.iter().map(|(stop, _)| *stop).collect();
        let (distance_km, free_flow_minutes) = stops
            .windows(2)
            .filter_map(|pair| legs[pair[0]][pair[1]])
            .fold((0.0, 0.0), |(km, min), leg| (km + leg.distance_km, min + leg.duration_min));

        let minutes = if request.consider_traffic {
            self.traffic.adjust_minutes(free_flow_minutes, request.depart_at)
        } else {
            free_flow_minutes
        };

        Ok(OptimizedRoute {
            request_id,
            pickup_points: request.pickups.clone(),
            drop_points: request.drops.clone(),
            order: stops
                .iter()
                .map(|&stop| {
                    if stop < pickup_count {
                        WaypointRef {
                            kind: WaypointKind::Pickup,
                            index: stop,
                        }
                    } else {
                        WaypointRef {
                            kind: WaypointKind::Drop,
                            index: stop - pickup_count,
                        }
                    }
                })
                .collect(),
            optimized_route: stops.iter().map(|&stop| waypoints[stop].clone()).collect(),
            distance_km,
            free_flow_minutes,
            time_estimate_minutes: minutes.ceil().max(0.0) as u32,
            traffic_considered: request.consider_traffic,
            computed_at: request.depart_at,
        })
    }

    /// Pairwise legs. `None` marks an unreachable pair; timeouts that survive
    /// every retry abort the whole computation.
    fn leg_matrix(&self, waypoints: &[&Location]) -> Result<Vec<Vec<Option<RouteLeg>>>, DispatchError> {
        let n = waypoints.len();
        let mut legs = vec![vec![None; n]; n];
        for from in 0..n {
            for to in 0..n {
                if from == to {
                    continue;
                }
                legs[from][to] = match self.leg_with_retry(waypoints[from], waypoints[to]) {
                    Ok(leg) => Some(leg),
                    Err(RouteError::Unreachable) => None,
                    Err(RouteError::Timeout) => {
                        return Err(DispatchError::RouteTimeout {
                            attempts: self.timeout_retries + 1,
                        })
                    }
                };
            }
        }
        Ok(legs)
    }

    /// Query the provider, retrying timeouts up to the configured bound.
    pub fn leg_with_retry(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError> {
        let mut attempt = 0;
        loop {
            match self.provider.leg(from, to) {
                Err(RouteError::Timeout) if attempt < self.timeout_retries => {
                    attempt += 1;
                    debug!(attempt, "route provider timed out, retrying");
                }
                other => return other,
            }
        }
    }

    /// Single-leg estimate without touching the cache. Falls back to the
    /// coarse estimate on provider failure. Traffic applies when enabled in
    /// the routing config.
    pub fn estimate_leg(&self, from: &Location, to: &Location, at: DateTime<Utc>) -> Option<RouteLeg> {
        let leg = match self.leg_with_retry(from, to) {
            Ok(leg) => leg,
            Err(err) => {
                warn!(error = %err, "route provider failed, using straight-line estimate");
                coarse_leg(from, to, self.average_speed_kmh)?
            }
        };
        let duration_min = if self.consider_traffic {
            self.traffic.adjust_minutes(leg.duration_min, at)
        } else {
            leg.duration_min
        };
        Some(RouteLeg {
            distance_km: leg.distance_km,
            duration_min,
        })
    }
}

impl PickupEtaEstimator for RouteOptimizer {
    fn pickup_eta_minutes(&self, from: &Location, to: &Location, at: DateTime<Utc>) -> Option<f64> {
        self.estimate_leg(from, to, at).map(|leg| leg.duration_min)
    }
}

fn seconds(minutes: f64) -> u64 {
    (minutes * 60.0).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::H3GridRouteProvider;
    use crate::spatial::offset_km;
    use crate::traffic::TrafficProfileKind;
    use chrono::TimeZone;
    use h3o::Resolution;

    fn optimizer(config: RoutingConfig) -> RouteOptimizer {
        let provider = H3GridRouteProvider::new(Resolution::Nine, config.average_speed_kmh, config.max_leg_km);
        RouteOptimizer::new(Box::new(provider), &config)
    }

    fn depart() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 3, 0, 0).unwrap()
    }

    #[test]
    fn single_pickup_and_drop_is_a_direct_route() {
        let origin = Location::new(52.52, 13.405);
        let dest = offset_km(&origin, 6.0, 0.0);
        let route = optimizer(RoutingConfig::default())
            .optimize(RideId(1), &RouteRequest::single(origin.clone(), dest.clone(), false, depart()))
            .expect("route");
        assert_eq!(route.optimized_route, vec![origin, dest]);
        assert_eq!(route.time_estimate_minutes, 12);
        assert!(!route.traffic_considered);
    }

    #[test]
    fn pickups_are_all_visited_before_any_drop() {
        let origin = Location::new(52.52, 13.405);
        // The drop sits between the two pickups, but must wait for both.
        let request = RouteRequest {
            pickups: vec![origin.clone(), offset_km(&origin, 4.0, 0.0)],
            drops: vec![offset_km(&origin, 2.0, 0.0)],
            consider_traffic: false,
            depart_at: depart(),
        };
        let route = optimizer(RoutingConfig::default())
            .optimize(RideId(2), &request)
            .expect("route");
        let kinds: Vec<_> = route.order.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WaypointKind::Pickup, WaypointKind::Pickup, WaypointKind::Drop]);
    }

    #[test]
    fn shorter_visiting_order_wins() {
        let origin = Location::new(52.52, 13.405);
        let near = offset_km(&origin, 1.0, 0.0);
        let far = offset_km(&origin, 5.0, 0.0);
        let request = RouteRequest {
            pickups: vec![origin],
            drops: vec![far, near],
            consider_traffic: false,
            depart_at: depart(),
        };
        let route = optimizer(RoutingConfig::default())
            .optimize(RideId(3), &request)
            .expect("route");
        assert_eq!(
            route.order[1..],
            [
                WaypointRef { kind: WaypointKind::Drop, index: 1 },
                WaypointRef { kind: WaypointKind::Drop, index: 0 },
            ]
        );
        assert!((route.distance_km - 5.0).abs() < 0.1);
    }

    #[test]
    fn traffic_profile_stretches_estimate() {
        let config = RoutingConfig {
            traffic: TrafficProfileKind::Metro,
            ..RoutingConfig::default()
        };
        let origin = Location::new(52.52, 13.405);
        let dest = offset_km(&origin, 6.0, 0.0);
        let rush = Utc.with_ymd_and_hms(2024, 5, 6, 17, 0, 0).unwrap();
        let route = optimizer(config)
            .optimize(RideId(4), &RouteRequest::single(origin, dest, true, rush))
            .expect("route");
        assert!(route.traffic_considered);
        assert_eq!(route.time_estimate_minutes, 30);
    }

    #[test]
    fn unreachable_waypoint_fails_closed() {
        let origin = Location::new(52.52, 13.405);
        let request = RouteRequest {
            pickups: vec![origin.clone()],
            drops: vec![offset_km(&origin, 2.0, 0.0), Location::new(-33.87, 151.21)],
            consider_traffic: false,
            depart_at: depart(),
        };
        let err = optimizer(RoutingConfig::default())
            .optimize(RideId(5), &request)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnreachableWaypoint { index: 2 }));
    }

    #[test]
    fn changed_inputs_replace_the_cached_record() {
        let optimizer = optimizer(RoutingConfig::default());
        let origin = Location::new(52.52, 13.405);
        let first = RouteRequest::single(origin.clone(), offset_km(&origin, 3.0, 0.0), false, depart());
        let second = RouteRequest::single(origin.clone(), offset_km(&origin, 9.0, 0.0), false, depart());

        let a = optimizer.optimize(RideId(6), &first).expect("first");
        assert_eq!(optimizer.optimize(RideId(6), &first).expect("cached"), a);
        let b = optimizer.optimize(RideId(6), &second).expect("second");
        assert_ne!(a, b);
        assert_eq!(optimizer.cached(RideId(6)), Some(b));
    }

    #[test]
    fn too_many_waypoints_is_a_validation_error() {
        let config = RoutingConfig {
            max_waypoints: 3,
            ..RoutingConfig::default()
        };
        let origin = Location::new(52.52, 13.405);
        let request = RouteRequest {
            pickups: vec![origin.clone(), origin.clone()],
            drops: vec![origin.clone(), origin],
            consider_traffic: false,
            depart_at: depart(),
        };
        let err = optimizer(config).optimize(RideId(7), &request).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }
}
