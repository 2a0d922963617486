//! JSON summary of a finished scenario.

use std::collections::BTreeMap;

use dispatch_core::settlement::PaymentStatus;
use dispatch_core::trust::TrustRecord;
use dispatch_core::{Dispatcher, Money, RideStatus};
use serde::Serialize;

use crate::scenario::ScenarioStats;

#[derive(Debug, Serialize)]
pub struct PaymentSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub reconciled: usize,
    pub collected: Money,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct TrustSummary {
    pub users: usize,
    pub mean: f64,
    pub lowest: Vec<TrustRecord>,
    pub highest: Vec<TrustRecord>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub matching_rounds: usize,
    pub rides_by_status: BTreeMap<String, usize>,
    pub pickups_rejected: usize,
    pub reviews: usize,
    pub payments: PaymentSummary,
    pub trust: TrustSummary,
}

const TRUST_EXTREMES: usize = 3;

impl ScenarioReport {
    pub fn collect(seed: u64, dispatcher: &Dispatcher, stats: &ScenarioStats) -> Self {
        let mut rides_by_status = BTreeMap::new();
        for status in [
            RideStatus::Pending,
            RideStatus::Accepted,
            RideStatus::Ongoing,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            rides_by_status.insert(status.to_string(), 0);
        }
        for ride in dispatcher.rides() {
            *rides_by_status.entry(ride.status.to_string()).or_insert(0) += 1;
        }

        let payments = dispatcher.payments();
        let succeeded: Vec<_> = payments
            .iter()
            .filter(|payment| payment.status == PaymentStatus::Success)
            .collect();
        let collected = Money::from_minor(succeeded.iter().map(|payment| payment.amount.minor_units()).sum());

        let mut records = dispatcher.trust_records();
        records.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.user.cmp(&b.user)));
        let mean = if records.is_empty() {
            dispatcher.config().trust.neutral_score
        } else {
            records.iter().map(|record| record.score).sum::<f64>() / records.len() as f64
        };

        Self {
            seed,
            matching_rounds: stats.rounds,
            rides_by_status,
            pickups_rejected: stats.pickups_rejected,
            reviews: stats.reviews,
            payments: PaymentSummary {
                succeeded: succeeded.len(),
                failed: payments.len() - succeeded.len(),
                reconciled: stats.reconciled,
                collected,
                currency: dispatcher.config().settlement.currency.clone(),
            },
            trust: TrustSummary {
                users: records.len(),
                mean,
                lowest: records.iter().take(TRUST_EXTREMES).copied().collect(),
                highest: records.iter().rev().take(TRUST_EXTREMES).copied().collect(),
            },
        }
    }
}
