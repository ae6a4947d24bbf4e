use super::cashback::{Cashback, CashbackStatus, NewCashback};
use super::notification::Notification;
use super::progress::{UserAchievementProgress, UserBadgeProgress};
use super::purchase::{NewPurchase, Purchase};
use super::transfer::{TransferErrorCode, TransferRequest, TransferResponse, VerificationResponse};
use super::user::User;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only access to user accounts owned by another system.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, user_id: u64) -> Result<Option<User>>;
}

/// Everything one purchase event writes, applied as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionCommit {
    pub purchase: NewPurchase,
    pub achievement_progress: Vec<UserAchievementProgress>,
    pub badge_progress: Vec<UserBadgeProgress>,
}

#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    async fn purchases_for_user(&self, user_id: u64) -> Result<Vec<Purchase>>;
    async fn achievement_progress(&self, user_id: u64) -> Result<Vec<UserAchievementProgress>>;
    async fn badge_progress(&self, user_id: u64) -> Result<Vec<UserBadgeProgress>>;
    /// Stores the purchase and upserts every progress row, all or nothing.
    ///
    /// If the user already has a purchase with the same payment reference,
    /// nothing is written and that purchase is returned as a duplicate.
    async fn commit_progression(&self, commit: ProgressionCommit) -> Result<CommitOutcome>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Purchase),
    Duplicate(Purchase),
}

impl CommitOutcome {
    pub fn purchase(&self) -> &Purchase {
        match self {
            CommitOutcome::Committed(purchase) | CommitOutcome::Duplicate(purchase) => purchase,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Cashback),
    Existing(Cashback),
}

#[async_trait]
pub trait CashbackStore: Send + Sync {
    /// Inserts the record unless one already exists for the same user and purchase.
    async fn create_if_absent(&self, cashback: NewCashback) -> Result<CreateOutcome>;
    async fn update(&self, cashback: &Cashback) -> Result<()>;
    async fn get(&self, id: u64) -> Result<Option<Cashback>>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Cashback>>;
    /// Resolves the stored idempotency key for the pair, then the record behind it.
    async fn find_by_purchase(&self, user_id: u64, purchase_id: u64) -> Result<Option<Cashback>>;
    async fn list_by_status(&self, status: CashbackStatus) -> Result<Vec<Cashback>>;
    async fn all(&self) -> Result<Vec<Cashback>>;
}

/// Boundary to the external money-transfer provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Structured failures come back as `Ok` with `success == false`; `Err`
    /// means the call itself broke.
    async fn initialize_transfer(&self, request: &TransferRequest) -> Result<TransferResponse>;

    async fn verify_transaction(&self, transaction_reference: &str) -> Result<VerificationResponse>;

    fn is_retryable_error(&self, code: TransferErrorCode) -> bool {
        matches!(
            code,
            TransferErrorCode::NetworkTimeout
                | TransferErrorCode::ServiceUnavailable
                | TransferErrorCode::UnknownError
        )
    }
}

/// Fire-and-forget output port for user-facing notifications.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: Notification);
}

pub type UserDirectoryRef = Arc<dyn UserDirectory>;
pub type LoyaltyStoreRef = Arc<dyn LoyaltyStore>;
pub type CashbackStoreRef = Arc<dyn CashbackStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type NotificationSinkRef = Arc<dyn NotificationSink>;
