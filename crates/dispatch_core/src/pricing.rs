//! Fare calculation: per-class rate table plus additive tag adjustments.
//!
//! Formula: `fare = base + per_km * distance_km + per_min * duration_min + Σ tag adjustments`,
//! clamped at zero and rounded half-up to the cent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::types::{Money, RideTags, TripMetrics, VehicleClass};

/// Rates for one vehicle class, in major currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassRate {
    pub base: f64,
    pub per_km: f64,
    pub per_min: f64,
}

impl ClassRate {
    pub const fn new(base: f64, per_km: f64, per_min: f64) -> Self {
        Self {
            base,
            per_km,
            per_min,
        }
    }
}

/// Flat amounts added when a tag is set. Negative values are discounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagAdjustments {
    pub pets_allowed: f64,
    pub no_smoking: f64,
    pub express_route: f64,
    pub ac_vehicle: f64,
    pub ladies_only: f64,
}

impl Default for TagAdjustments {
    fn default() -> Self {
        Self {
            pets_allowed: 30.0,
            no_smoking: 0.0,
            express_route: 25.0,
            ac_vehicle: 0.0,
            ladies_only: 0.0,
        }
    }
}

impl TagAdjustments {
    fn total_for(&self, tags: &RideTags) -> f64 {
        [
            (tags.pets_allowed, self.pets_allowed),
            (tags.no_smoking, self.no_smoking),
            (tags.express_route, self.express_route),
            (tags.ac_vehicle, self.ac_vehicle),
            (tags.ladies_only, self.ladies_only),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, amount)| amount)
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub rates: BTreeMap<VehicleClass, ClassRate>,
    pub tag_adjustments: TagAdjustments,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let rates = BTreeMap::from([
            (VehicleClass::Moto, ClassRate::new(20.0, 6.0, 1.0)),
            (VehicleClass::Auto, ClassRate::new(30.0, 9.0, 1.5)),
            (VehicleClass::Mini, ClassRate::new(50.0, 12.0, 2.0)),
            (VehicleClass::Sedan, ClassRate::new(70.0, 15.0, 2.5)),
            (VehicleClass::Suv, ClassRate::new(90.0, 18.0, 3.0)),
        ]);
        Self {
            rates,
            tag_adjustments: TagAdjustments::default(),
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.rates.is_empty() {
            return Err(DispatchError::Config("pricing rate table is empty".into()));
        }
        for (class, rate) in &self.rates {
            let values = [rate.base, rate.per_km, rate.per_min];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(DispatchError::Config(format!(
                    "rates for {class} must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }
}

/// Itemised fare; `total` is what gets charged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub vehicle_class: VehicleClass,
    pub base: f64,
    pub distance_component: f64,
    pub duration_component: f64,
    pub tag_adjustment: f64,
    pub total: Money,
}

/// Pure fare calculator over a fixed [`PricingConfig`].
#[derive(Debug, Clone, Default)]
pub struct FareCalculator {
    config: PricingConfig,
}

impl FareCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn calculate(
        &self,
        class: VehicleClass,
        metrics: TripMetrics,
        tags: &RideTags,
    ) -> Result<FareBreakdown, DispatchError> {
        metrics.validate()?;
        let rate = self
            .config
            .rates
            .get(&class)
            .ok_or_else(|| DispatchError::InvalidVehicleClass(class.to_string()))?;

        let distance_component = metrics.distance_km * rate.per_km;
        let duration_component = metrics.duration_min * rate.per_min;
        let tag_adjustment = self.config.tag_adjustments.total_for(tags);
        let raw = rate.base + distance_component + duration_component + tag_adjustment;

        Ok(FareBreakdown {
            vehicle_class: class,
            base: rate.base,
            distance_component,
            duration_component,
            tag_adjustment,
            total: Money::from_major_rounded(raw),
        })
    }

    /// Parse the class name first; unknown names fail instead of defaulting.
    pub fn calculate_named(
        &self,
        class: &str,
        metrics: TripMetrics,
        tags: &RideTags,
    ) -> Result<FareBreakdown, DispatchError> {
        self.calculate(class.parse()?, metrics, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_with_pets_adds_surcharge_to_distance_and_duration() {
        let calculator = FareCalculator::default();
        let tags = RideTags {
            pets_allowed: true,
            ..RideTags::default()
        };
        let fare = calculator
            .calculate(VehicleClass::Mini, TripMetrics::new(10.0, 20.0), &tags)
            .expect("fare");
        // 50 base + 10 km * 12 + 20 min * 2 + 30 pets
        assert_eq!(fare.total, Money::from_minor(24_000));
        assert_eq!(fare.tag_adjustment, 30.0);
    }

    #[test]
    fn zero_length_trip_costs_the_base_fare() {
        let calculator = FareCalculator::default();
        let fare = calculator
            .calculate(VehicleClass::Moto, TripMetrics::default(), &RideTags::default())
            .expect("fare");
        assert_eq!(fare.total, Money::from_minor(2_000));
    }

    #[test]
    fn discounts_never_push_fare_below_zero() {
        let mut config = PricingConfig::default();
        config.tag_adjustments.no_smoking = -500.0;
        let calculator = FareCalculator::new(config);
        let fare = calculator
            .calculate(VehicleClass::Moto, TripMetrics::new(1.0, 1.0), &RideTags::default())
            .expect("fare");
        assert_eq!(fare.total, Money::ZERO);
    }

    #[test]
    fn unknown_class_is_an_error_not_a_default() {
        let calculator = FareCalculator::default();
        let err = calculator
            .calculate_named("rickshaw", TripMetrics::new(1.0, 1.0), &RideTags::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidVehicleClass(_)));
    }

    #[test]
    fn class_missing_from_rate_table_is_rejected() {
        let mut config = PricingConfig::default();
        config.rates.remove(&VehicleClass::Suv);
        let calculator = FareCalculator::new(config);
        let err = calculator
            .calculate(VehicleClass::Suv, TripMetrics::new(1.0, 1.0), &RideTags::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidVehicleClass(name) if name == "suv"));
    }

    #[test]
    fn express_premium_is_additive() {
        let calculator = FareCalculator::default();
        let metrics = TripMetrics::new(4.0, 12.0);
        let plain = calculator
            .calculate(VehicleClass::Auto, metrics, &RideTags::default())
            .expect("plain");
        let express = calculator
            .calculate(
                VehicleClass::Auto,
                metrics,
                &RideTags {
                    express_route: true,
                    ..RideTags::default()
                },
            )
            .expect("express");
        assert_eq!(
            express.total.minor_units() - plain.total.minor_units(),
            2_500
        );
    }
}
