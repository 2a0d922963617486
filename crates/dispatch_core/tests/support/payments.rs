use std::sync::atomic::{AtomicU32, Ordering};

use dispatch_core::settlement::{
    ChargeReceipt, ChargeRequest, PaymentProvider, ProviderError, SimulatedPaymentGateway,
};

/// Reports the provider as unavailable for the first `failures` calls, then
/// delegates to the simulated gateway.
pub struct FlakyProvider {
    failures: AtomicU32,
    inner: SimulatedPaymentGateway,
}

impl FlakyProvider {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            inner: SimulatedPaymentGateway::default(),
        }
    }

    pub fn charges(&self) -> u64 {
        self.inner.charges()
    }
}

impl PaymentProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ProviderError> {
        let remaining = self.failures.load(Ordering::Acquire);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::Release);
            return Err(ProviderError::Unavailable("maintenance window".into()));
        }
        self.inner.charge(request)
    }
}
