//! Identifiers and value types shared by every component.

use std::fmt;
use std::str::FromStr;

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub u64);

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ride-{}", self.0)
    }
}

/// A platform user. Riders and captains share one id space: the same person
/// can request rides and drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// Monetary amount in minor units (cents). Non-negative by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(cents: u64) -> Self {
        Self(cents)
    }

    /// Round a major-unit amount half-up to the cent. Negative and non-finite
    /// inputs clamp to zero.
    pub fn from_major_rounded(amount: f64) -> Self {
        if !amount.is_finite() || amount <= 0.0 {
            return Self::ZERO;
        }
        Self((amount * 100.0).round() as u64)
    }

    pub fn minor_units(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// A pickup, drop or captain position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn lat_lng(&self) -> Result<LatLng, DispatchError> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lng) {
            return Err(DispatchError::Validation(format!(
                "coordinates ({}, {}) out of range",
                self.lat, self.lng
            )));
        }
        LatLng::new(self.lat, self.lng).map_err(|err| {
            DispatchError::Validation(format!(
                "invalid coordinates ({}, {}): {err}",
                self.lat, self.lng
            ))
        })
    }

    pub fn cell(&self, resolution: Resolution) -> Result<CellIndex, DispatchError> {
        Ok(self.lat_lng()?.to_cell(resolution))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Moto,
    Auto,
    Mini,
    Sedan,
    Suv,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 5] = [
        VehicleClass::Moto,
        VehicleClass::Auto,
        VehicleClass::Mini,
        VehicleClass::Sedan,
        VehicleClass::Suv,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Moto => "moto",
            VehicleClass::Auto => "auto",
            VehicleClass::Mini => "mini",
            VehicleClass::Sedan => "sedan",
            VehicleClass::Suv => "suv",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VehicleClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DispatchError::InvalidVehicleClass(wanted.to_string()))
    }
}

/// Rider preferences attached to a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideTags {
    pub pets_allowed: bool,
    pub no_smoking: bool,
    pub express_route: bool,
    pub ac_vehicle: bool,
    pub ladies_only: bool,
}

impl Default for RideTags {
    fn default() -> Self {
        Self {
            pets_allowed: false,
            no_smoking: true,
            express_route: false,
            ac_vehicle: true,
            ladies_only: false,
        }
    }
}

impl RideTags {
    /// Layer explicit overrides onto the defaults. `Some(false)` wins over a
    /// `true` default.
    pub fn with_overrides(overrides: &TagOverrides) -> Self {
        let defaults = Self::default();
        Self {
            pets_allowed: overrides.pets_allowed.unwrap_or(defaults.pets_allowed),
            no_smoking: overrides.no_smoking.unwrap_or(defaults.no_smoking),
            express_route: overrides.express_route.unwrap_or(defaults.express_route),
            ac_vehicle: overrides.ac_vehicle.unwrap_or(defaults.ac_vehicle),
            ladies_only: overrides.ladies_only.unwrap_or(defaults.ladies_only),
        }
    }
}

/// Per-tag overrides supplied by the caller; `None` keeps the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagOverrides {
    pub pets_allowed: Option<bool>,
    pub no_smoking: Option<bool>,
    pub express_route: Option<bool>,
    pub ac_vehicle: Option<bool>,
    pub ladies_only: Option<bool>,
}

/// Distance and duration of a trip, estimated or measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TripMetrics {
    pub distance_km: f64,
    pub duration_min: f64,
}

impl TripMetrics {
    pub fn new(distance_km: f64, duration_min: f64) -> Self {
        Self {
            distance_km,
            duration_min,
        }
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(self.distance_km) || !valid(self.duration_min) {
            return Err(DispatchError::Validation(format!(
                "trip metrics must be finite and non-negative (distance {} km, duration {} min)",
                self.distance_km, self.duration_min
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_false_override_is_preserved() {
        let overrides = TagOverrides {
            no_smoking: Some(false),
            ac_vehicle: Some(false),
            ..Default::default()
        };
        let tags = RideTags::with_overrides(&overrides);
        assert!(!tags.no_smoking);
        assert!(!tags.ac_vehicle);
        assert!(!tags.pets_allowed);
    }

    #[test]
    fn missing_overrides_keep_documented_defaults() {
        let tags = RideTags::with_overrides(&TagOverrides::default());
        assert_eq!(tags, RideTags::default());
        assert!(tags.no_smoking);
        assert!(tags.ac_vehicle);
    }

    #[test]
    fn vehicle_class_parses_case_insensitively() {
        assert_eq!("Mini".parse::<VehicleClass>().unwrap(), VehicleClass::Mini);
        assert_eq!(" suv ".parse::<VehicleClass>().unwrap(), VehicleClass::Suv);
        let err = "hovercraft".parse::<VehicleClass>().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidVehicleClass(name) if name == "hovercraft"));
    }

    #[test]
    fn money_rounds_half_up_and_clamps() {
        assert_eq!(Money::from_major_rounded(2.125).minor_units(), 213);
        assert_eq!(Money::from_major_rounded(-4.0), Money::ZERO);
        assert_eq!(Money::from_major_rounded(f64::NAN), Money::ZERO);
        assert_eq!(Money::from_minor(24000).to_string(), "240.00");
    }

    #[test]
    fn invalid_coordinates_are_rejected() {
        assert!(Location::new(95.0, 13.4).lat_lng().is_err());
        assert!(Location::new(52.52, 13.4).lat_lng().is_ok());
    }

    #[test]
    fn negative_metrics_are_rejected() {
        assert!(TripMetrics::new(-1.0, 3.0).validate().is_err());
        assert!(TripMetrics::new(1.0, f64::INFINITY).validate().is_err());
        assert!(TripMetrics::new(0.0, 0.0).validate().is_ok());
    }
}
