use crate::application::calculator::{CalculationResult, CashbackCalculator};
use crate::config::RetryConfig;
use crate::domain::cashback::{Cashback, CashbackStatus, MAX_RETRIES_EXCEEDED, NewCashback};
use crate::domain::catalog::{Achievement, Badge};
use crate::domain::notification::Notification;
use crate::domain::ports::{
    CashbackStoreRef, CreateOutcome, NotificationSinkRef, PaymentGatewayRef, UserDirectoryRef,
};
use crate::domain::purchase::Purchase;
use crate::domain::transfer::{
    Recipient, TransferErrorCode, TransferMetadata, TransferRequest, VerificationResponse,
};
use crate::domain::user::User;
use crate::error::{LoyaltyError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

const TRANSFER_KIND: &str = "cashback_payment";

/// Where a single settlement attempt left the cashback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Completed,
    /// Failed with a transient error; an external scheduler should retry it.
    RetryScheduled,
    /// Failed for good.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CashbackOutcome {
    NotEligible(CalculationResult),
    /// A cashback already exists for this purchase; nothing was sent to the gateway.
    Existing(Cashback),
    Settled {
        calculation: CalculationResult,
        cashback: Cashback,
        outcome: SettlementOutcome,
    },
}

impl CashbackOutcome {
    pub fn cashback(&self) -> Option<&Cashback> {
        match self {
            CashbackOutcome::NotEligible(_) => None,
            CashbackOutcome::Existing(cashback) => Some(cashback),
            CashbackOutcome::Settled { cashback, .. } => Some(cashback),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub completed: usize,
    pub still_failing: usize,
    pub errors: usize,
}

/// Creates cashback records exactly once per purchase and drives them
/// through the payment gateway.
///
/// Retries are never scheduled internally: callers poll
/// [`select_cashbacks_due_for_retry`](Self::select_cashbacks_due_for_retry)
/// and feed the results to
/// [`retry_cashback_payment`](Self::retry_cashback_payment).
pub struct SettlementService {
    calculator: CashbackCalculator,
    cashbacks: CashbackStoreRef,
    gateway: PaymentGatewayRef,
    users: UserDirectoryRef,
    notifier: NotificationSinkRef,
    retry: RetryConfig,
    gateway_timeout: Duration,
}

impl SettlementService {
    pub fn new(
        calculator: CashbackCalculator,
        cashbacks: CashbackStoreRef,
        gateway: PaymentGatewayRef,
        users: UserDirectoryRef,
        notifier: NotificationSinkRef,
        retry: RetryConfig,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            calculator,
            cashbacks,
            gateway,
            users,
            notifier,
            retry,
            gateway_timeout,
        }
    }

    pub fn calculator(&self) -> &CashbackCalculator {
        &self.calculator
    }

    pub async fn process_cashback_for_purchase(
        &self,
        user: &User,
        purchase: &Purchase,
        unlocked_achievements: &[Achievement],
        unlocked_badges: &[Badge],
        held_badges: &[Badge],
    ) -> Result<CashbackOutcome> {
        if let Some(existing) = self.cashbacks.find_by_purchase(user.id, purchase.id).await? {
            info!(
                cashback_id = existing.id,
                idempotency_key = %existing.idempotency_key,
                "Cashback already exists for purchase"
            );
            return Ok(CashbackOutcome::Existing(existing));
        }

        let calculation = self.calculator.calculate(
            user,
            purchase,
            unlocked_achievements,
            unlocked_badges,
            held_badges,
        );
        if !calculation.eligible {
            return Ok(CashbackOutcome::NotEligible(calculation));
        }

        let new_cashback = NewCashback {
            user_id: user.id,
            purchase_id: purchase.id,
            amount: calculation.amount,
            currency: calculation.currency.clone(),
            idempotency_key: generate_idempotency_key(user.id, purchase.id),
            payment_provider: self.gateway.provider_name().to_string(),
            created_at: Utc::now(),
        };

        let mut cashback = match self.cashbacks.create_if_absent(new_cashback).await? {
            CreateOutcome::Existing(existing) => {
                info!(cashback_id = existing.id, "Cashback created concurrently, reusing it");
                return Ok(CashbackOutcome::Existing(existing));
            }
            CreateOutcome::Created(cashback) => cashback,
        };

        info!(
            cashback_id = cashback.id,
            user_id = user.id,
            purchase_id = purchase.id,
            amount = %cashback.amount,
            idempotency_key = %cashback.idempotency_key,
            "Cashback initiated"
        );
        self.notifier
            .publish(Notification::cashback_initiated(&cashback, Utc::now()));

        let outcome = self.attempt_settlement(&mut cashback, user).await?;
        Ok(CashbackOutcome::Settled {
            calculation,
            cashback,
            outcome,
        })
    }

    /// Sends one transfer for the cashback and records the result on it.
    ///
    /// Gateway failures, errors and timeouts all end up on the record; only
    /// a failure to persist the record is returned as an error.
    pub async fn attempt_settlement(
        &self,
        cashback: &mut Cashback,
        user: &User,
    ) -> Result<SettlementOutcome> {
        cashback.begin_attempt(Utc::now());
        self.cashbacks.update(cashback).await?;

        let request = TransferRequest {
            amount: cashback.amount,
            currency: cashback.currency.clone(),
            recipient: Recipient {
                user_id: user.id,
                email: user.email.clone(),
            },
            reference: cashback.idempotency_key.clone(),
            metadata: TransferMetadata {
                cashback_id: cashback.id,
                purchase_id: cashback.purchase_id,
                kind: TRANSFER_KIND.to_string(),
            },
        };

        let call = self.gateway.initialize_transfer(&request);
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(Ok(response)) if response.success => {
                cashback.complete(response.transaction_reference, Utc::now());
                self.cashbacks.update(cashback).await?;
                info!(
                    cashback_id = cashback.id,
                    transaction_reference = ?cashback.transaction_reference,
                    "Cashback payment completed"
                );
                self.notifier
                    .publish(Notification::cashback_completed(cashback, Utc::now()));
                Ok(SettlementOutcome::Completed)
            }
            Ok(Ok(response)) => {
                let code = response.error_code.unwrap_or(TransferErrorCode::UnknownError);
                // Kept for reconciliation with the provider.
                cashback.transaction_reference = Some(response.transaction_reference);
                let retryable = self.gateway.is_retryable_error(code);
                warn!(
                    cashback_id = cashback.id,
                    error_code = %code,
                    transaction_reference = ?cashback.transaction_reference,
                    retryable,
                    message = %response.message,
                    "Cashback payment failed"
                );
                self.record_failure(cashback, response.message, retryable)
                    .await
            }
            Ok(Err(err)) => {
                error!(cashback_id = cashback.id, error = %err, "Payment gateway call failed");
                self.record_failure(cashback, err.to_string(), true).await
            }
            Err(_) => {
                warn!(
                    cashback_id = cashback.id,
                    timeout_ms = self.gateway_timeout.as_millis() as u64,
                    "Payment gateway call timed out"
                );
                self.record_failure(cashback, "Payment gateway timed out".to_string(), true)
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        cashback: &mut Cashback,
        reason: String,
        retryable: bool,
    ) -> Result<SettlementOutcome> {
        let outcome = if !retryable {
            cashback.fail_terminal(reason);
            SettlementOutcome::Failed
        } else if cashback.retry_count < self.retry.max_attempts {
            cashback.fail_retryable(reason);
            SettlementOutcome::RetryScheduled
        } else {
            cashback.fail_terminal(MAX_RETRIES_EXCEEDED.to_string());
            SettlementOutcome::Failed
        };
        self.cashbacks.update(cashback).await?;

        let will_retry = outcome == SettlementOutcome::RetryScheduled;
        let reason = cashback.failure_reason.clone().unwrap_or_default();
        self.notifier.publish(Notification::cashback_failed(
            cashback,
            &reason,
            will_retry,
            Utc::now(),
        ));
        Ok(outcome)
    }

    /// Re-attempts a failed or stranded cashback. Returns `true` only if the payment completed.
    pub async fn retry_cashback_payment(&self, cashback_id: u64) -> Result<bool> {
        self.retry_cashback_payment_at(cashback_id, Utc::now()).await
    }

    async fn retry_cashback_payment_at(&self, cashback_id: u64, now: DateTime<Utc>) -> Result<bool> {
        let mut cashback = self
            .cashbacks
            .get(cashback_id)
            .await?
            .ok_or(LoyaltyError::CashbackNotFound(cashback_id))?;

        let stranded = cashback.is_stranded(now, self.retry.stale_after_minutes);
        if stranded {
            warn!(
                cashback_id,
                status = %cashback.status,
                "Cashback attempt never recorded an outcome, retrying"
            );
        } else if !cashback.awaiting_retry() {
            warn!(
                cashback_id,
                status = %cashback.status,
                "Cashback is not awaiting retry, skipping"
            );
            return Ok(false);
        }

        if cashback.retry_count >= self.retry.max_attempts {
            cashback.fail_terminal(MAX_RETRIES_EXCEEDED.to_string());
            self.cashbacks.update(&cashback).await?;
            warn!(cashback_id, retry_count = cashback.retry_count, "Max retries exceeded for cashback");
            self.notifier.publish(Notification::cashback_failed(
                &cashback,
                MAX_RETRIES_EXCEEDED,
                false,
                Utc::now(),
            ));
            return Ok(false);
        }

        let user = self
            .users
            .get(cashback.user_id)
            .await?
            .ok_or(LoyaltyError::UserNotFound(cashback.user_id))?;

        cashback.retry_count += 1;
        info!(cashback_id, retry_count = cashback.retry_count, "Retrying cashback payment");
        let outcome = self.attempt_settlement(&mut cashback, &user).await?;
        Ok(outcome == SettlementOutcome::Completed)
    }

    /// Failed, retryable cashbacks whose backoff has elapsed at `now`, plus
    /// stranded ones whose last attempt never stored a result. Read only.
    pub async fn select_cashbacks_due_for_retry_at(&self, now: DateTime<Utc>) -> Result<Vec<Cashback>> {
        let mut due: Vec<Cashback> = self
            .cashbacks
            .list_by_status(CashbackStatus::Failed)
            .await?
            .into_iter()
            .filter(|c| c.due_for_retry(now, self.retry.max_attempts, &self.retry.delay_minutes))
            .collect();
        for status in [CashbackStatus::Initiated, CashbackStatus::Processing] {
            due.extend(
                self.cashbacks
                    .list_by_status(status)
                    .await?
                    .into_iter()
                    .filter(|c| c.is_stranded(now, self.retry.stale_after_minutes)),
            );
        }
        due.sort_by_key(|c| c.id);
        Ok(due)
    }

    pub async fn select_cashbacks_due_for_retry(&self) -> Result<Vec<Cashback>> {
        self.select_cashbacks_due_for_retry_at(Utc::now()).await
    }

    /// One scheduler tick: retries everything due at `now`.
    ///
    /// A broken retry is logged and counted; it does not stop the others.
    pub async fn process_due_retries(&self, now: DateTime<Utc>) -> Result<RetrySummary> {
        let due = self.select_cashbacks_due_for_retry_at(now).await?;
        let mut summary = RetrySummary::default();

        for cashback in due {
            summary.attempted += 1;
            match self.retry_cashback_payment_at(cashback.id, now).await {
                Ok(true) => summary.completed += 1,
                Ok(false) => summary.still_failing += 1,
                Err(err) => {
                    error!(cashback_id = cashback.id, error = %err, "Cashback retry failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            completed = summary.completed,
            still_failing = summary.still_failing,
            errors = summary.errors,
            "Processed cashback retries"
        );
        Ok(summary)
    }

    pub async fn cashback_status(&self, idempotency_key: &str) -> Result<Option<Cashback>> {
        self.cashbacks.find_by_idempotency_key(idempotency_key).await
    }

    /// Asks the gateway whether a paid cashback's transfer went through.
    pub async fn verify_payment(&self, cashback_id: u64) -> Result<VerificationResponse> {
        let cashback = self
            .cashbacks
            .get(cashback_id)
            .await?
            .ok_or(LoyaltyError::CashbackNotFound(cashback_id))?;
        let reference = cashback.transaction_reference.ok_or_else(|| {
            LoyaltyError::ValidationError(format!(
                "Cashback {} has no transaction reference",
                cashback_id
            ))
        })?;
        self.gateway.verify_transaction(&reference).await
    }
}

/// `cashback_{user}_{purchase}_{suffix}`; the suffix keeps keys unique if ids are ever reused.
pub fn generate_idempotency_key(user_id: u64, purchase_id: u64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("cashback_{}_{}_{}", user_id, purchase_id, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CashbackConfig;
    use crate::domain::money::Currency;
    use crate::domain::ports::{CashbackStore, PaymentGateway};
    use crate::domain::purchase::PurchaseEvent;
    use crate::domain::transfer::{TransferResponse, VerificationStatus};
    use crate::infrastructure::in_memory::{InMemoryCashbackStore, InMemoryUserDirectory};
    use crate::infrastructure::notifier::TracingNotifier;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the given code on every call, or hangs when no code is set.
    struct FixedGateway {
        code: Option<TransferErrorCode>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl FixedGateway {
        fn failing(code: TransferErrorCode) -> Self {
            Self {
                code: Some(code),
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn succeeding() -> Self {
            Self {
                code: None,
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn hanging() -> Self {
            Self {
                code: None,
                hang: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for FixedGateway {
        fn provider_name(&self) -> &str {
            "fixed"
        }

        async fn initialize_transfer(&self, _request: &TransferRequest) -> Result<TransferResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let reference = format!("TXN_FIXED{:03}", call);
            Ok(match self.code {
                Some(code) => TransferResponse::failed(reference, code, "scripted failure"),
                None => TransferResponse::succeeded(reference),
            })
        }

        async fn verify_transaction(&self, reference: &str) -> Result<VerificationResponse> {
            Ok(VerificationResponse {
                transaction_reference: reference.to_string(),
                status: VerificationStatus::Completed,
                verified_at: Some(Utc::now()),
            })
        }
    }

    fn user() -> User {
        User::new(1, "Ada", "ada@example.com")
    }

    fn purchase(id: u64, amount: rust_decimal::Decimal) -> Purchase {
        PurchaseEvent::new(1, amount)
            .into_new_purchase(&Currency::default(), Utc::now())
            .unwrap()
            .into_purchase(id)
    }

    fn service(
        gateway: Arc<FixedGateway>,
        store: InMemoryCashbackStore,
        timeout: Duration,
    ) -> SettlementService {
        SettlementService::new(
            CashbackCalculator::new(CashbackConfig::default()),
            Arc::new(store),
            gateway,
            Arc::new(InMemoryUserDirectory::with_users([user()])),
            Arc::new(TracingNotifier),
            RetryConfig::default(),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_not_eligible_creates_nothing() {
        let gateway = Arc::new(FixedGateway::succeeding());
        let store = InMemoryCashbackStore::new();
        let service = service(gateway.clone(), store.clone(), Duration::from_secs(5));

        let outcome = service
            .process_cashback_for_purchase(&user(), &purchase(1, dec!(50)), &[], &[], &[])
            .await
            .unwrap();

        assert!(matches!(outcome, CashbackOutcome::NotEligible(_)));
        assert!(store.all().await.unwrap().is_empty());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_and_verification() {
        let gateway = Arc::new(FixedGateway::succeeding());
        let store = InMemoryCashbackStore::new();
        let service = service(gateway, store, Duration::from_secs(5));

        let outcome = service
            .process_cashback_for_purchase(&user(), &purchase(1, dec!(5000)), &[], &[], &[])
            .await
            .unwrap();
        let CashbackOutcome::Settled { cashback, outcome, .. } = outcome else {
            panic!("expected a settlement attempt");
        };
        assert_eq!(outcome, SettlementOutcome::Completed);
        assert_eq!(cashback.amount, dec!(50.00));
        assert_eq!(cashback.payment_provider, "fixed");
        assert!(cashback.idempotency_key.starts_with("cashback_1_1_"));

        let by_key = service
            .cashback_status(&cashback.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.status, CashbackStatus::Completed);

        let verification = service.verify_payment(cashback.id).await.unwrap();
        assert_eq!(verification.transaction_reference, "TXN_FIXED001");
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_terminal() {
        let gateway = Arc::new(FixedGateway::failing(TransferErrorCode::InsufficientFunds));
        let service = service(gateway.clone(), InMemoryCashbackStore::new(), Duration::from_secs(5));

        let outcome = service
            .process_cashback_for_purchase(&user(), &purchase(1, dec!(5000)), &[], &[], &[])
            .await
            .unwrap();
        let cashback = outcome.cashback().unwrap();
        assert_eq!(cashback.status, CashbackStatus::Failed);
        assert!(cashback.is_terminal());
        assert_eq!(cashback.transaction_reference.as_deref(), Some("TXN_FIXED001"));

        assert!(!service.retry_cashback_payment(cashback.id).await.unwrap());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert!(service
            .select_cashbacks_due_for_retry_at(Utc::now() + ChronoDuration::days(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_retryable() {
        let gateway = Arc::new(FixedGateway::hanging());
        let service = service(gateway, InMemoryCashbackStore::new(), Duration::from_millis(50));

        let outcome = service
            .process_cashback_for_purchase(&user(), &purchase(1, dec!(5000)), &[], &[], &[])
            .await
            .unwrap();
        let CashbackOutcome::Settled { cashback, outcome, .. } = outcome else {
            panic!("expected a settlement attempt");
        };
        assert_eq!(outcome, SettlementOutcome::RetryScheduled);
        assert!(cashback.awaiting_retry());
        assert_eq!(cashback.failure_reason.as_deref(), Some("Payment gateway timed out"));
    }

    #[tokio::test]
    async fn test_stranded_attempt_is_picked_up_by_retry_round() {
        let gateway = Arc::new(FixedGateway::succeeding());
        let store = InMemoryCashbackStore::new();
        let service = service(gateway.clone(), store.clone(), Duration::from_secs(5));

        let CreateOutcome::Created(mut cashback) = store
            .create_if_absent(NewCashback {
                user_id: 1,
                purchase_id: 3,
                amount: dec!(25.00),
                currency: Currency::default(),
                idempotency_key: generate_idempotency_key(1, 3),
                payment_provider: "fixed".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
        else {
            panic!("expected a new cashback");
        };
        // The process died after marking the attempt.
        cashback.begin_attempt(Utc::now());
        store.update(&cashback).await.unwrap();

        assert!(service.select_cashbacks_due_for_retry().await.unwrap().is_empty());

        let later = Utc::now() + ChronoDuration::hours(1);
        let due = service.select_cashbacks_due_for_retry_at(later).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, CashbackStatus::Processing);

        let summary = service.process_due_retries(later).await.unwrap();
        assert_eq!(summary.completed, 1);
        let settled = store.get(cashback.id).await.unwrap().unwrap();
        assert_eq!(settled.status, CashbackStatus::Completed);
        assert_eq!(settled.retry_count, 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_of_unknown_cashback() {
        let service = service(
            Arc::new(FixedGateway::succeeding()),
            InMemoryCashbackStore::new(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            service.retry_cashback_payment(77).await,
            Err(LoyaltyError::CashbackNotFound(77))
        ));
    }

    #[test]
    fn test_idempotency_key_format() {
        let key = generate_idempotency_key(4, 9);
        assert!(key.starts_with("cashback_4_9_"));
        assert_eq!(key.len(), "cashback_4_9_".len() + 8);
        assert_ne!(key, generate_idempotency_key(4, 9));
    }
}
