//! Engine configuration. Every section has working defaults, so an empty
//! JSON object is a valid config file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::matching::MatchingConfig;
use crate::otp::OtpConfig;
use crate::pricing::PricingConfig;
use crate::routing::RoutingConfig;
use crate::settlement::SettlementConfig;
use crate::trust::TrustConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pricing: PricingConfig,
    pub otp: OtpConfig,
    pub matching: MatchingConfig,
    pub routing: RoutingConfig,
    pub trust: TrustConfig,
    pub settlement: SettlementConfig,
}

impl DispatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, DispatchError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| DispatchError::Config(format!("failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| DispatchError::Config(format!("failed to read {}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, DispatchError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| DispatchError::Config(format!("failed to serialize config: {err}")))
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        self.pricing.validate()?;
        self.otp.validate()?;
        self.matching.validate()?;
        self.routing.validate()?;
        self.trust.validate()?;
        self.settlement.validate()
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_otp(mut self, otp: OtpConfig) -> Self {
        self.otp = otp;
        self
    }

    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_trust(mut self, trust: TrustConfig) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_settlement(mut self, settlement: SettlementConfig) -> Self {
        self.settlement = settlement;
        self
    }
}
