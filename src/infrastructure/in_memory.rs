use crate::domain::cashback::{Cashback, CashbackStatus, NewCashback};
use crate::domain::ports::{
    CashbackStore, CommitOutcome, CreateOutcome, LoyaltyStore, ProgressionCommit, UserDirectory,
};
use crate::domain::progress::{UserAchievementProgress, UserBadgeProgress};
use crate::domain::purchase::Purchase;
use crate::domain::user::User;
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory user directory.
///
/// Stands in for the account system in tests and in the CLI, where users are
/// loaded from a CSV file up front.
#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<u64, User>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|user| (user.id, user)).collect();
        Self {
            users: Arc::new(RwLock::new(users)),
        }
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, user_id: u64) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).cloned())
    }
}

#[derive(Default)]
struct LoyaltyState {
    next_purchase_id: u64,
    purchases: HashMap<u64, Vec<Purchase>>,
    achievement_progress: BTreeMap<(u64, u64), UserAchievementProgress>,
    badge_progress: BTreeMap<(u64, u64), UserBadgeProgress>,
}

/// Purchases and progress rows behind a single lock.
///
/// A progression commit takes the write lock once, so readers never observe
/// a purchase without its progress updates.
#[derive(Default, Clone)]
pub struct InMemoryLoyaltyStore {
    state: Arc<RwLock<LoyaltyState>>,
}

impl InMemoryLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoyaltyStore for InMemoryLoyaltyStore {
    async fn purchases_for_user(&self, user_id: u64) -> Result<Vec<Purchase>> {
        let state = self.state.read().await;
        Ok(state.purchases.get(&user_id).cloned().unwrap_or_default())
    }

    async fn achievement_progress(&self, user_id: u64) -> Result<Vec<UserAchievementProgress>> {
        let state = self.state.read().await;
        Ok(state
            .achievement_progress
            .range((user_id, u64::MIN)..=(user_id, u64::MAX))
            .map(|(_, progress)| progress.clone())
            .collect())
    }

    async fn badge_progress(&self, user_id: u64) -> Result<Vec<UserBadgeProgress>> {
        let state = self.state.read().await;
        Ok(state
            .badge_progress
            .range((user_id, u64::MIN)..=(user_id, u64::MAX))
            .map(|(_, progress)| progress.clone())
            .collect())
    }

    async fn commit_progression(&self, commit: ProgressionCommit) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;
        let recorded = state
            .purchases
            .get(&commit.purchase.user_id)
            .and_then(|purchases| commit.purchase.find_recorded(purchases));
        if let Some(existing) = recorded {
            return Ok(CommitOutcome::Duplicate(existing.clone()));
        }

        state.next_purchase_id += 1;
        let purchase = commit.purchase.into_purchase(state.next_purchase_id);

        state
            .purchases
            .entry(purchase.user_id)
            .or_default()
            .push(purchase.clone());
        for progress in commit.achievement_progress {
            state
                .achievement_progress
                .insert((progress.user_id, progress.achievement_id), progress);
        }
        for progress in commit.badge_progress {
            state
                .badge_progress
                .insert((progress.user_id, progress.badge_id), progress);
        }

        Ok(CommitOutcome::Committed(purchase))
    }
}

#[derive(Default)]
struct CashbackState {
    next_id: u64,
    cashbacks: BTreeMap<u64, Cashback>,
    by_key: HashMap<String, u64>,
    keys_by_purchase: HashMap<(u64, u64), String>,
}

/// A thread-safe in-memory cashback ledger with idempotency-key indexes.
#[derive(Default, Clone)]
pub struct InMemoryCashbackStore {
    state: Arc<RwLock<CashbackState>>,
}

impl InMemoryCashbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CashbackStore for InMemoryCashbackStore {
    async fn create_if_absent(&self, cashback: NewCashback) -> Result<CreateOutcome> {
        let mut state = self.state.write().await;
        let existing = state
            .keys_by_purchase
            .get(&(cashback.user_id, cashback.purchase_id))
            .and_then(|key| state.by_key.get(key))
            .and_then(|id| state.cashbacks.get(id));
        if let Some(existing) = existing {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        if state.by_key.contains_key(&cashback.idempotency_key) {
            return Err(LoyaltyError::PersistenceError(format!(
                "Idempotency key '{}' already belongs to another cashback",
                cashback.idempotency_key
            )));
        }

        state.next_id += 1;
        let cashback = cashback.into_cashback(state.next_id);
        state
            .by_key
            .insert(cashback.idempotency_key.clone(), cashback.id);
        state.keys_by_purchase.insert(
            (cashback.user_id, cashback.purchase_id),
            cashback.idempotency_key.clone(),
        );
        state.cashbacks.insert(cashback.id, cashback.clone());
        Ok(CreateOutcome::Created(cashback))
    }

    async fn update(&self, cashback: &Cashback) -> Result<()> {
        let mut state = self.state.write().await;
        match state.cashbacks.get_mut(&cashback.id) {
            Some(stored) => {
                *stored = cashback.clone();
                Ok(())
            }
            None => Err(LoyaltyError::CashbackNotFound(cashback.id)),
        }
    }

    async fn get(&self, id: u64) -> Result<Option<Cashback>> {
        let state = self.state.read().await;
        Ok(state.cashbacks.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Cashback>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.cashbacks.get(id))
            .cloned())
    }

    async fn find_by_purchase(&self, user_id: u64, purchase_id: u64) -> Result<Option<Cashback>> {
        let state = self.state.read().await;
        Ok(state
            .keys_by_purchase
            .get(&(user_id, purchase_id))
            .and_then(|key| state.by_key.get(key))
            .and_then(|id| state.cashbacks.get(id))
            .cloned())
    }

    async fn list_by_status(&self, status: CashbackStatus) -> Result<Vec<Cashback>> {
        let state = self.state.read().await;
        Ok(state
            .cashbacks
            .values()
            .filter(|cashback| cashback.status == status)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Cashback>> {
        let state = self.state.read().await;
        Ok(state.cashbacks.values().cloned().collect())
    }
}
