use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Location, RideTags, UserId, VehicleClass};

/// What a captain's vehicle and preferences can accommodate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptainCapabilities {
    pub pets_allowed: bool,
    pub no_smoking: bool,
    pub ac_vehicle: bool,
    pub ladies_only: bool,
}

impl CaptainCapabilities {
    /// Every capability set.
    pub fn all() -> Self {
        Self {
            pets_allowed: true,
            no_smoking: true,
            ac_vehicle: true,
            ladies_only: true,
        }
    }

    /// Each requested tag needs the matching capability. `expressRoute` is a
    /// routing preference and constrains nobody.
    pub fn supports(&self, tags: &RideTags) -> bool {
        (!tags.pets_allowed || self.pets_allowed)
            && (!tags.no_smoking || self.no_smoking)
            && (!tags.ac_vehicle || self.ac_vehicle)
            && (!tags.ladies_only || self.ladies_only)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptainProfile {
    pub id: UserId,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub capabilities: CaptainCapabilities,
    pub location: Location,
}

/// One message from the availability feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptainUpdate {
    pub captain: UserId,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptainStatus {
    OffDuty,
    Available,
    /// Claimed by a ride; only that ride's end frees the captain.
    Assigned,
}

impl CaptainStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CaptainStatus::OffDuty => 0,
            CaptainStatus::Available => 1,
            CaptainStatus::Assigned => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CaptainStatus::Available,
            2 => CaptainStatus::Assigned,
            _ => CaptainStatus::OffDuty,
        }
    }
}

/// Point-in-time view of an available captain handed to the ranking step.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableCaptain {
    pub id: UserId,
    pub vehicle_class: VehicleClass,
    pub capabilities: CaptainCapabilities,
    pub location: Location,
    pub available_since: DateTime<Utc>,
}

/// A compatible captain with its ranking inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub captain: UserId,
    pub pickup_eta_min: f64,
    pub trust_score: f64,
    pub score: f64,
    pub available_since: DateTime<Utc>,
}
