use crate::config::GatewayConfig;
use crate::domain::ports::PaymentGateway;
use crate::domain::transfer::{
    TransferErrorCode, TransferRequest, TransferResponse, VerificationResponse, VerificationStatus,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::time::Duration;
use tracing::info;

pub const MOCK_PROVIDER: &str = "mock";
const REFERENCE_PREFIX: &str = "TXN_";

/// Outcome classes the simulated provider draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Success,
    NetworkTimeout,
    InsufficientFunds,
    ServiceUnavailable,
}

/// Simulated transfer provider with configurable failure rates.
///
/// Each call sleeps for a random processing delay and then succeeds or
/// fails according to the configured distribution. A fresh transaction
/// reference is returned whatever the outcome.
#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    config: GatewayConfig,
}

impl MockPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Maps a uniform roll in `[0, 1)` onto the configured distribution.
    pub fn outcome_for(&self, roll: f64) -> MockOutcome {
        let mut roll = roll;
        if roll < self.config.success_rate {
            return MockOutcome::Success;
        }
        roll -= self.config.success_rate;
        if roll < self.config.network_timeout_rate {
            return MockOutcome::NetworkTimeout;
        }
        roll -= self.config.network_timeout_rate;
        if roll < self.config.insufficient_funds_rate {
            return MockOutcome::InsufficientFunds;
        }
        MockOutcome::ServiceUnavailable
    }

    async fn simulate_processing_delay(&self) {
        let [min, max] = self.config.processing_delay_ms;
        let delay = rand::thread_rng().gen_range(min..=max.max(min));
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

pub fn generate_transaction_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}{}", REFERENCE_PREFIX, suffix.to_uppercase())
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn provider_name(&self) -> &str {
        MOCK_PROVIDER
    }

    async fn initialize_transfer(&self, request: &TransferRequest) -> Result<TransferResponse> {
        self.simulate_processing_delay().await;

        let reference = generate_transaction_reference();
        info!(
            reference = %reference,
            amount = %request.amount,
            currency = %request.currency,
            recipient = request.recipient.user_id,
            "Mock payment transfer initiated"
        );

        let roll: f64 = rand::thread_rng().r#gen();
        let response = match self.outcome_for(roll) {
            MockOutcome::Success => TransferResponse::succeeded(reference),
            MockOutcome::NetworkTimeout => TransferResponse::failed(
                reference,
                TransferErrorCode::NetworkTimeout,
                "Network timeout occurred during transfer",
            ),
            MockOutcome::InsufficientFunds => TransferResponse::failed(
                reference,
                TransferErrorCode::InsufficientFunds,
                "Insufficient funds in merchant account",
            ),
            MockOutcome::ServiceUnavailable => TransferResponse::failed(
                reference,
                TransferErrorCode::ServiceUnavailable,
                "Payment service temporarily unavailable",
            ),
        };
        Ok(response)
    }

    async fn verify_transaction(&self, transaction_reference: &str) -> Result<VerificationResponse> {
        self.simulate_processing_delay().await;
        info!(reference = %transaction_reference, "Mock payment verification requested");

        let status = if !transaction_reference.starts_with(REFERENCE_PREFIX) {
            VerificationStatus::NotFound
        } else {
            let roll: f64 = rand::thread_rng().r#gen();
            if roll < 0.85 {
                VerificationStatus::Completed
            } else if roll < 0.95 {
                VerificationStatus::Pending
            } else {
                VerificationStatus::Failed
            }
        };

        Ok(VerificationResponse {
            transaction_reference: transaction_reference.to_string(),
            status,
            verified_at: (status == VerificationStatus::Completed).then(Utc::now),
        })
    }
}
