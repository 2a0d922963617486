//! Pluggable route providers: trait abstraction for routing backends.
//!
//! - **`H3GridRouteProvider`**: H3 grid reachability + haversine distance at an
//!   average speed. Zero external calls.
//! - **`OsrmRouteProvider`** (feature `osrm`): calls an OSRM HTTP endpoint with a
//!   bounded request timeout.
//!
//! Providers answer single legs. [`optimizer::RouteOptimizer`] combines legs
//! into an ordered multi-stop route and owns retries, traffic and caching.

pub mod optimizer;

use h3o::Resolution;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DispatchError;
use crate::spatial::{haversine_km, travel_minutes};
use crate::traffic::TrafficProfileKind;
use crate::types::Location;

pub use optimizer::{OptimizedRoute, RouteOptimizer, RouteRequest, WaypointKind, WaypointRef};

/// One point-to-point leg at free-flow speed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_min: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route between waypoints")]
    Unreachable,
    #[error("route provider timed out")]
    Timeout,
}

/// Trait for routing backends. Implementations must be `Send + Sync` so one
/// provider can serve concurrent matching passes.
pub trait RouteProvider: Send + Sync {
    fn leg(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError>;
}

/// Which routing backend to use.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RouteProviderKind {
    #[default]
    H3Grid,
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub provider: RouteProviderKind,
    /// H3 resolution used for reachability checks (0–15).
    pub h3_resolution: u8,
    pub average_speed_kmh: f64,
    /// Legs longer than this are treated as unreachable by the grid provider.
    pub max_leg_km: f64,
    pub traffic: TrafficProfileKind,
    /// Whether ride estimates apply the traffic profile.
    pub consider_traffic: bool,
    /// Extra attempts after a provider timeout.
    pub timeout_retries: u32,
    pub max_waypoints: usize,
    pub cache_capacity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            provider: RouteProviderKind::default(),
            h3_resolution: 9,
            average_speed_kmh: 30.0,
            max_leg_km: 150.0,
            traffic: TrafficProfileKind::default(),
            consider_traffic: true,
            timeout_retries: 2,
            max_waypoints: 10,
            cache_capacity: 4_096,
        }
    }
}

impl RoutingConfig {
    pub fn resolution(&self) -> Result<Resolution, DispatchError> {
        Resolution::try_from(self.h3_resolution).map_err(|err| {
            DispatchError::Config(format!("invalid h3 resolution {}: {err}", self.h3_resolution))
        })
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        self.resolution()?;
        self.traffic.validate()?;
        if !self.average_speed_kmh.is_finite() || self.average_speed_kmh <= 0.0 {
            return Err(DispatchError::Config("average speed must be positive".into()));
        }
        if !self.max_leg_km.is_finite() || self.max_leg_km <= 0.0 {
            return Err(DispatchError::Config("max leg distance must be positive".into()));
        }
        if !(2..=16).contains(&self.max_waypoints) {
            return Err(DispatchError::Config(format!(
                "max_waypoints must be between 2 and 16, got {}",
                self.max_waypoints
            )));
        }
        if self.cache_capacity == 0 {
            return Err(DispatchError::Config("route cache capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Straight-line leg at `speed_kmh`. Used when a provider cannot answer.
pub fn coarse_leg(from: &Location, to: &Location, speed_kmh: f64) -> Option<RouteLeg> {
    let distance_km = haversine_km(from.lat_lng().ok()?, to.lat_lng().ok()?);
    Some(RouteLeg {
        distance_km,
        duration_min: travel_minutes(distance_km, speed_kmh),
    })
}

// ---------------------------------------------------------------------------
// H3 Grid provider (always available)
// ---------------------------------------------------------------------------

/// A leg is reachable when both ends share an H3 local IJ frame (no pentagon
/// in between) and lie within `max_leg_km`.
#[derive(Debug, Clone, Copy)]
pub struct H3GridRouteProvider {
    resolution: Resolution,
    average_speed_kmh: f64,
    max_leg_km: f64,
}

impl H3GridRouteProvider {
    pub fn new(resolution: Resolution, average_speed_kmh: f64, max_leg_km: f64) -> Self {
        Self {
            resolution,
            average_speed_kmh,
            max_leg_km,
        }
    }
}

impl RouteProvider for H3GridRouteProvider {
    fn leg(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError> {
        let from_ll = from.lat_lng().map_err(|_| RouteError::Unreachable)?;
        let to_ll = to.lat_lng().map_err(|_| RouteError::Unreachable)?;
        let distance_km = haversine_km(from_ll, to_ll);
        if distance_km > self.max_leg_km {
            return Err(RouteError::Unreachable);
        }
        let from_cell = from_ll.to_cell(self.resolution);
        let to_cell = to_ll.to_cell(self.resolution);
        if from_cell.grid_distance(to_cell).is_err() {
            return Err(RouteError::Unreachable);
        }
        Ok(RouteLeg {
            distance_km,
            duration_min: travel_minutes(distance_km, self.average_speed_kmh),
        })
    }
}

// ---------------------------------------------------------------------------
// OSRM provider (behind `osrm` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "osrm")]
pub mod osrm {
    use super::*;
    use reqwest::blocking::Client;
    use std::time::Duration;

    /// Routes via an OSRM HTTP endpoint. Every request is bounded by `timeout`.
    pub struct OsrmRouteProvider {
        client: Client,
        endpoint: String,
    }

    impl OsrmRouteProvider {
        pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DispatchError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| DispatchError::Config(format!("failed to build HTTP client: {err}")))?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    /// Minimal OSRM JSON response structures.
    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        distance: f64, // metres
        duration: f64, // seconds
    }

    impl RouteProvider for OsrmRouteProvider {
        fn leg(&self, from: &Location, to: &Location) -> Result<RouteLeg, RouteError> {
            let url = format!(
                "{}/route/v1/driving/{},{};{},{}?overview=false",
                self.endpoint, from.lng, from.lat, to.lng, to.lat,
            );

            let response = self.client.get(&url).send().map_err(|err| {
                if err.is_timeout() {
                    RouteError::Timeout
                } else {
                    RouteError::Unreachable
                }
            })?;
            let body: OsrmResponse = response.json().map_err(|_| RouteError::Unreachable)?;
            if body.code != "Ok" {
                return Err(RouteError::Unreachable);
            }
            let route = body
                .routes
                .and_then(|routes| routes.into_iter().next())
                .ok_or(RouteError::Unreachable)?;

            Ok(RouteLeg {
                distance_km: route.distance / 1000.0,
                duration_min: route.duration / 60.0,
            })
        }
    }
}

/// Construct the configured provider.
pub fn build_route_provider(config: &RoutingConfig) -> Result<Box<dyn RouteProvider>, DispatchError> {
    match &config.provider {
        RouteProviderKind::H3Grid => Ok(Box::new(H3GridRouteProvider::new(
            config.resolution()?,
            config.average_speed_kmh,
            config.max_leg_km,
        ))),

        #[cfg(feature = "osrm")]
        RouteProviderKind::Osrm {
            endpoint,
            timeout_ms,
        } => Ok(Box::new(osrm::OsrmRouteProvider::new(
            endpoint,
            std::time::Duration::from_millis(*timeout_ms),
        )?)),
    }
}
