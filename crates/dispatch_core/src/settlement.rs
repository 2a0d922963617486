//! Settlement: charge the final fare once, record the payment, feed trust.
//!
//! The ledger holds at most one [`Payment`] per ride. A failed charge keeps
//! its record and flags the ride for reconciliation; a later successful
//! reconciliation updates that same record in place. Trust completion events
//! fire only on the transition into `Settled`, which happens once per ride.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::DispatchError;
use crate::ride::{PaymentLink, Ride, SettlementStatus};
use crate::trust::{TrustEvent, TrustFeedback};
use crate::types::{Money, RideId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub currency: String,
    /// Extra attempts after a provider timeout, reusing the idempotency key.
    pub max_retries: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            max_retries: 2,
        }
    }
}

impl SettlementConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DispatchError::Config(format!(
                "currency must be a three-letter code, got `{}`",
                self.currency
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub ride_id: RideId,
    pub payer: UserId,
    pub amount: Money,
    pub currency: String,
    pub provider: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    /// Provider calls made for this ride across settle and reconcile.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub ride_id: RideId,
    pub payer: UserId,
    pub amount: Money,
    pub currency: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub status: ChargeStatus,
    pub transaction_id: String,
    pub order_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("payment provider timed out")]
    Timeout,
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

/// External payment boundary. Implementations must be idempotent per
/// `idempotency_key`: repeating a successful charge returns the original
/// receipt instead of charging again.
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;
    fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ProviderError>;
}

/// Result of a settle or reconcile call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub ride_id: RideId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub settlement: SettlementStatus,
    pub transaction_id: Option<String>,
    /// True when the call found the ride already settled and did nothing.
    pub replayed: bool,
}

#[derive(Debug, Default)]
pub struct PaymentLedger {
    payments: Mutex<HashMap<RideId, Payment>>,
}

impl PaymentLedger {
    fn lock(&self) -> MutexGuard<'_, HashMap<RideId, Payment>> {
        self.payments.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, ride: RideId) -> Option<Payment> {
        self.lock().get(&ride).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All payments ordered by ride id.
    pub fn payments(&self) -> Vec<Payment> {
        let mut payments: Vec<_> = self.lock().values().cloned().collect();
        payments.sort_by_key(|payment| payment.ride_id);
        payments
    }

    fn record(&self, payment: Payment) {
        self.lock().insert(payment.ride_id, payment);
    }
}

enum ChargeOutcome {
    Paid(ChargeReceipt),
    Failed(String),
}

pub struct Settlement {
    config: SettlementConfig,
    provider: Arc<dyn PaymentProvider>,
    trust: Arc<dyn TrustFeedback>,
    clock: Arc<dyn Clock>,
    ledger: PaymentLedger,
}

impl Settlement {
    pub fn new(
        config: SettlementConfig,
        provider: Arc<dyn PaymentProvider>,
        trust: Arc<dyn TrustFeedback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            provider,
            trust,
            clock,
            ledger: PaymentLedger::default(),
        }
    }

    pub fn ledger(&self) -> &PaymentLedger {
        &self.ledger
    }

    /// Settle a completed ride. Calling it again after the first attempt
    /// returns the recorded outcome without contacting the provider.
    pub fn settle(&self, ride: &mut Ride) -> Result<SettlementReceipt, DispatchError> {
        let amount = ride.amount_due()?;
        match ride.settlement() {
            Some(SettlementStatus::Unsettled) => self.attempt(ride, amount),
            _ => self.replay(ride, amount),
        }
    }

    /// Retry a failed payment with the original idempotency key. Fails with
    /// `PaymentFailure` if the provider still does not accept the charge.
    pub fn reconcile(&self, ride: &mut Ride) -> Result<SettlementReceipt, DispatchError> {
        let amount = ride.amount_due()?;
        match ride.settlement() {
            Some(SettlementStatus::Settled) => self.replay(ride, amount),
            _ => {
                let receipt = self.attempt(ride, amount)?;
                if receipt.status == PaymentStatus::Success {
                    Ok(receipt)
                } else {
                    let reason = self
                        .ledger
                        .get(ride.id())
                        .and_then(|payment| payment.failure_reason)
                        .unwrap_or_else(|| "payment declined".to_string());
                    Err(DispatchError::PaymentFailure {
                        ride: ride.id(),
                        reason,
                    })
                }
            }
        }
    }

    fn replay(&self, ride: &Ride, amount: Money) -> Result<SettlementReceipt, DispatchError> {
        let payment = self.ledger.get(ride.id());
        Ok(SettlementReceipt {
            ride_id: ride.id(),
            amount,
            status: payment
                .as_ref()
                .map(|payment| payment.status)
                .unwrap_or(PaymentStatus::Failed),
            settlement: ride.settlement().unwrap_or(SettlementStatus::Unsettled),
            transaction_id: payment.and_then(|payment| payment.transaction_id),
            replayed: true,
        })
    }

    fn attempt(&self, ride: &mut Ride, amount: Money) -> Result<SettlementReceipt, DispatchError> {
        let captain = ride.captain();
        let request = ChargeRequest {
            ride_id: ride.id(),
            payer: ride.rider(),
            amount,
            currency: self.config.currency.clone(),
            idempotency_key: idempotency_key(ride.id()),
        };
        let (outcome, calls) = self.charge_with_retry(&request);
        let now = self.clock.now();
        let previous = self.ledger.get(ride.id());
        let mut payment = Payment {
            ride_id: request.ride_id,
            payer: request.payer,
            amount,
            currency: request.currency.clone(),
            provider: self.provider.name().to_string(),
            status: PaymentStatus::Failed,
            transaction_id: None,
            failure_reason: None,
            attempts: previous.as_ref().map_or(0, |p| p.attempts) + calls,
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };

        match outcome {
            ChargeOutcome::Paid(receipt) => {
                payment.status = PaymentStatus::Success;
                payment.transaction_id = Some(receipt.transaction_id.clone());
                ride.mark_settled(PaymentLink {
                    transaction_id: receipt.transaction_id.clone(),
                    order_id: receipt.order_id,
                    signature: receipt.signature,
                })?;
                self.ledger.record(payment);
                info!(ride_id = %request.ride_id, amount = %amount, transaction = %receipt.transaction_id, "ride settled");

                self.trust.record(TrustEvent::RideCompleted {
                    ride: request.ride_id,
                    user: request.payer,
                });
                if let Some(captain) = captain {
                    self.trust.record(TrustEvent::RideCompleted {
                        ride: request.ride_id,
                        user: captain,
                    });
                }
                Ok(SettlementReceipt {
                    ride_id: request.ride_id,
                    amount,
                    status: PaymentStatus::Success,
                    settlement: SettlementStatus::Settled,
                    transaction_id: Some(receipt.transaction_id),
                    replayed: false,
                })
            }
            ChargeOutcome::Failed(reason) => {
                ride.mark_needs_reconciliation()?;
                warn!(ride_id = %request.ride_id, amount = %amount, reason = %reason, "payment failed, ride flagged for reconciliation");
                payment.failure_reason = Some(reason);
                self.ledger.record(payment);
                Ok(SettlementReceipt {
                    ride_id: request.ride_id,
                    amount,
                    status: PaymentStatus::Failed,
                    settlement: SettlementStatus::NeedsReconciliation,
                    transaction_id: None,
                    replayed: false,
                })
            }
        }
    }

    /// Returns the outcome and the number of provider calls made.
    fn charge_with_retry(&self, request: &ChargeRequest) -> (ChargeOutcome, u32) {
        let mut calls = 0;
        loop {
            calls += 1;
            match self.provider.charge(request) {
                Ok(ChargeReceipt {
                    status: ChargeStatus::Declined { reason },
                    ..
                }) => return (ChargeOutcome::Failed(reason), calls),
                Ok(receipt) => return (ChargeOutcome::Paid(receipt), calls),
                Err(ProviderError::Timeout) if calls <= self.config.max_retries => {
                    warn!(ride_id = %request.ride_id, attempt = calls, "payment provider timed out, retrying");
                }
                Err(err) => return (ChargeOutcome::Failed(err.to_string()), calls),
            }
        }
    }
}

pub fn idempotency_key(ride: RideId) -> String {
    ride.to_string()
}

// ---------------------------------------------------------------------------
// In-memory gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GatewayState {
    settled: HashMap<String, ChargeReceipt>,
    declined: HashSet<RideId>,
    pending_timeouts: HashMap<RideId, u32>,
    calls: u64,
    charges: u64,
}

/// Deterministic in-process provider. Successful charges are remembered per
/// idempotency key; declines are not, so a later retry can succeed.
pub struct SimulatedPaymentGateway {
    merchant_key: String,
    state: Mutex<GatewayState>,
}

impl SimulatedPaymentGateway {
    pub fn new(merchant_key: impl Into<String>) -> Self {
        Self {
            merchant_key: merchant_key.into(),
            state: Mutex::new(GatewayState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decline every charge for `ride` until toggled back.
    pub fn decline_ride(&self, ride: RideId, declined: bool) {
        let mut state = self.lock();
        if declined {
            state.declined.insert(ride);
        } else {
            state.declined.remove(&ride);
        }
    }

    /// Time out the next `count` calls for `ride`.
    pub fn time_out_next(&self, ride: RideId, count: u32) {
        self.lock().pending_timeouts.insert(ride, count);
    }

    /// Provider calls received, including timeouts and replays.
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    /// Distinct successful charges, i.e. money actually moved.
    pub fn charges(&self) -> u64 {
        self.lock().charges
    }

    fn sign(&self, order_id: &str, transaction_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(order_id.as_bytes());
        hasher.update(b"|");
        hasher.update(transaction_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.merchant_key.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl Default for SimulatedPaymentGateway {
    fn default() -> Self {
        Self::new("sim-merchant-key")
    }
}

impl PaymentProvider for SimulatedPaymentGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ProviderError> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(remaining) = state.pending_timeouts.get_mut(&request.ride_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Timeout);
            }
        }
        if let Some(receipt) = state.settled.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }
        let order_id = format!("order_{}", request.ride_id.0);
        let transaction_id = format!("txn_{:08}", state.calls);
        let signature = self.sign(&order_id, &transaction_id);
        if state.declined.contains(&request.ride_id) {
            return Ok(ChargeReceipt {
                status: ChargeStatus::Declined {
                    reason: "card declined".to_string(),
                },
                transaction_id,
                order_id,
                signature,
            });
        }
        let receipt = ChargeReceipt {
            status: ChargeStatus::Success,
            transaction_id,
            order_id,
            signature,
        };
        state.charges += 1;
        state
            .settled
            .insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ride: u64) -> ChargeRequest {
        ChargeRequest {
            ride_id: RideId(ride),
            payer: UserId(1),
            amount: Money::from_minor(12_500),
            currency: "INR".into(),
            idempotency_key: idempotency_key(RideId(ride)),
        }
    }

    #[test]
    fn gateway_replays_successful_charge_for_same_key() {
        let gateway = SimulatedPaymentGateway::default();
        let first = gateway.charge(&request(1)).expect("charge");
        let second = gateway.charge(&request(1)).expect("charge");
        assert_eq!(first, second);
        assert_eq!(gateway.charges(), 1);
        assert_eq!(gateway.calls(), 2);
    }

    #[test]
    fn declines_are_not_cached() {
        let gateway = SimulatedPaymentGateway::default();
        gateway.decline_ride(RideId(2), true);
        let declined = gateway.charge(&request(2)).expect("charge");
        assert!(matches!(declined.status, ChargeStatus::Declined { .. }));
        gateway.decline_ride(RideId(2), false);
        let paid = gateway.charge(&request(2)).expect("charge");
        assert_eq!(paid.status, ChargeStatus::Success);
        assert_eq!(gateway.charges(), 1);
    }

    #[test]
    fn scripted_timeouts_run_out() {
        let gateway = SimulatedPaymentGateway::default();
        gateway.time_out_next(RideId(3), 1);
        assert_eq!(gateway.charge(&request(3)), Err(ProviderError::Timeout));
        assert!(gateway.charge(&request(3)).is_ok());
    }

    #[test]
    fn signature_is_hex_sha256() {
        let gateway = SimulatedPaymentGateway::default();
        let receipt = gateway.charge(&request(4)).expect("charge");
        assert_eq!(receipt.signature.len(), 64);
        assert!(receipt.signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(receipt.order_id, "order_4");
    }

    #[test]
    fn currency_must_be_three_letters() {
        let config = SettlementConfig {
            currency: "rupees".into(),
            ..SettlementConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SettlementConfig::default().validate().is_ok());
    }
}
