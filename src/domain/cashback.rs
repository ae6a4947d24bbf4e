use super::money::Currency;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Lifecycle of a cashback payout.
///
/// `Failed` is terminal only when the record is no longer retryable; see
/// [`Cashback::is_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashbackStatus {
    Initiated,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for CashbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            CashbackStatus::Initiated => "initiated",
            CashbackStatus::Processing => "processing",
            CashbackStatus::Completed => "completed",
            CashbackStatus::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// A cashback record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCashback {
    pub user_id: u64,
    pub purchase_id: u64,
    pub amount: Decimal,
    pub currency: Currency,
    pub idempotency_key: String,
    pub payment_provider: String,
    pub created_at: DateTime<Utc>,
}

impl NewCashback {
    pub fn into_cashback(self, id: u64) -> Cashback {
        Cashback {
            id,
            user_id: self.user_id,
            purchase_id: self.purchase_id,
            amount: self.amount,
            currency: self.currency,
            idempotency_key: self.idempotency_key,
            payment_provider: self.payment_provider,
            status: CashbackStatus::Initiated,
            retryable: false,
            retry_count: 0,
            last_retry_at: None,
            failure_reason: None,
            transaction_reference: None,
            paid_at: None,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cashback {
    pub id: u64,
    pub user_id: u64,
    pub purchase_id: u64,
    pub amount: Decimal,
    pub currency: Currency,
    pub idempotency_key: String,
    pub payment_provider: String,
    pub status: CashbackStatus,
    /// Only meaningful while `status` is `Failed`: whether a retry may still happen.
    pub retryable: bool,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub transaction_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Cashback {
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = CashbackStatus::Processing;
        self.last_retry_at = Some(now);
    }

    pub fn complete(&mut self, transaction_reference: String, now: DateTime<Utc>) {
        self.status = CashbackStatus::Completed;
        self.retryable = false;
        self.transaction_reference = Some(transaction_reference);
        self.paid_at = Some(now);
        self.failure_reason = None;
    }

    pub fn fail_retryable(&mut self, reason: String) {
        self.status = CashbackStatus::Failed;
        self.retryable = true;
        self.failure_reason = Some(reason);
    }

    pub fn fail_terminal(&mut self, reason: String) {
        self.status = CashbackStatus::Failed;
        self.retryable = false;
        self.failure_reason = Some(reason);
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            CashbackStatus::Completed => true,
            CashbackStatus::Failed => !self.retryable,
            CashbackStatus::Initiated | CashbackStatus::Processing => false,
        }
    }

    pub fn awaiting_retry(&self) -> bool {
        self.status == CashbackStatus::Failed && self.retryable
    }

    /// Left in `initiated` or `processing` for longer than `stale_after_minutes`,
    /// i.e. an attempt whose outcome was never stored.
    pub fn is_stranded(&self, now: DateTime<Utc>, stale_after_minutes: u64) -> bool {
        if !matches!(self.status, CashbackStatus::Initiated | CashbackStatus::Processing) {
            return false;
        }
        let since = self.last_retry_at.unwrap_or(self.created_at);
        i64::try_from(stale_after_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|stale| since.checked_add_signed(stale))
            .is_some_and(|cutoff| cutoff <= now)
    }

    /// Whether the backoff for the next attempt has elapsed.
    ///
    /// The delay is looked up by the current retry count; counts past the end
    /// of the schedule reuse its last entry.
    pub fn due_for_retry(&self, now: DateTime<Utc>, max_attempts: u32, delay_minutes: &[u64]) -> bool {
        if !self.awaiting_retry() || self.retry_count >= max_attempts {
            return false;
        }
        let delay = delay_minutes
            .get(self.retry_count as usize)
            .or_else(|| delay_minutes.last())
            .copied()
            .unwrap_or(0);
        let delay = i64::try_from(delay).ok().and_then(Duration::try_minutes);

        match (self.last_retry_at, delay) {
            (None, _) => true,
            (Some(last), Some(delay)) => last
                .checked_add_signed(delay)
                .is_some_and(|due| due <= now),
            (Some(_), None) => false,
        }
    }
}
