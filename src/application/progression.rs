use crate::domain::catalog::{Achievement, Badge, Catalog};
use crate::domain::money::Currency;
use crate::domain::notification::Notification;
use crate::domain::ports::{
    CommitOutcome, LoyaltyStoreRef, NotificationSinkRef, ProgressionCommit, UserDirectoryRef,
};
use crate::domain::progress::{
    ProgressChange, UserAchievementProgress, UserBadgeProgress, completion_percentage,
};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseEvent};
use crate::domain::user::User;
use crate::error::{LoyaltyError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// What a single purchase event produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionResult {
    pub user: User,
    pub purchase: Purchase,
    pub unlocked_achievements: Vec<Achievement>,
    pub unlocked_badges: Vec<Badge>,
    /// The event repeated a payment reference the user already had; `purchase`
    /// is the stored one and nothing was written.
    pub duplicate: bool,
}

impl ProgressionResult {
    fn duplicate(user: User, purchase: Purchase) -> Self {
        Self {
            user,
            purchase,
            unlocked_achievements: Vec::new(),
            unlocked_badges: Vec::new(),
            duplicate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementProgressView {
    pub achievement_id: u64,
    pub name: String,
    pub description: String,
    pub progress: u64,
    pub points_required: u64,
    pub percentage: Decimal,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeProgressView {
    pub badge_id: u64,
    pub name: String,
    pub description: String,
    pub percentage: Decimal,
    pub required_achievements: usize,
    pub completed_achievements: usize,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Turns purchase events into stored purchases and achievement/badge progress.
///
/// Everything an event changes is written through one
/// [`LoyaltyStore::commit_progression`](crate::domain::ports::LoyaltyStore::commit_progression)
/// call, and notifications are only published once that commit has succeeded.
/// Events for the same user are processed one at a time.
pub struct ProgressionEngine {
    users: UserDirectoryRef,
    store: LoyaltyStoreRef,
    catalog: Arc<Catalog>,
    notifier: NotificationSinkRef,
    default_currency: Currency,
    user_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl ProgressionEngine {
    pub fn new(
        users: UserDirectoryRef,
        store: LoyaltyStoreRef,
        catalog: Arc<Catalog>,
        notifier: NotificationSinkRef,
        default_currency: Currency,
    ) -> Self {
        Self {
            users,
            store,
            catalog,
            notifier,
            default_currency,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn process(&self, event: PurchaseEvent) -> Result<ProgressionResult> {
        let now = Utc::now();
        let purchase = event.into_new_purchase(&self.default_currency, now)?;
        let user = self.require_user(purchase.user_id).await?;
        let user_id = user.id;

        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.process_locked(user, purchase, now).await
        };
        self.release_user_lock(user_id, lock).await;
        result
    }

    async fn process_locked(
        &self,
        user: User,
        purchase: NewPurchase,
        now: DateTime<Utc>,
    ) -> Result<ProgressionResult> {
        let mut history = self.store.purchases_for_user(user.id).await?;
        if let Some(existing) = purchase.find_recorded(&history) {
            info!(
                user_id = user.id,
                purchase_id = existing.id,
                "Purchase already recorded for this payment reference"
            );
            return Ok(ProgressionResult::duplicate(user, existing.clone()));
        }
        // Rules only look at amounts and dates, the id is assigned on commit.
        history.push(purchase.clone().into_purchase(0));

        let mut stored: HashMap<u64, UserAchievementProgress> = self
            .store
            .achievement_progress(user.id)
            .await?
            .into_iter()
            .map(|row| (row.achievement_id, row))
            .collect();

        let mut achievement_updates = Vec::new();
        let mut unlocked_achievements = Vec::new();
        let mut held: HashSet<u64> = HashSet::new();
        for achievement in self.catalog.achievements() {
            let mut row = stored
                .remove(&achievement.id)
                .unwrap_or_else(|| UserAchievementProgress::new(user.id, achievement.id));
            let observed = achievement.rule.evaluate(&history);

            match row.advance(observed, achievement.points_required, now) {
                ProgressChange::Unchanged => {}
                ProgressChange::Advanced => achievement_updates.push(row.clone()),
                ProgressChange::Unlocked => {
                    info!(
                        user_id = user.id,
                        achievement_id = achievement.id,
                        achievement = %achievement.name,
                        "Achievement unlocked"
                    );
                    unlocked_achievements.push(achievement.clone());
                    achievement_updates.push(row.clone());
                }
            }
            if row.unlocked {
                held.insert(achievement.id);
            }
        }

        let mut stored_badges: HashMap<u64, UserBadgeProgress> = self
            .store
            .badge_progress(user.id)
            .await?
            .into_iter()
            .map(|row| (row.badge_id, row))
            .collect();

        let mut badge_updates = Vec::new();
        let mut unlocked_badges = Vec::new();
        for badge in self.catalog.badges() {
            let mut row = stored_badges
                .remove(&badge.id)
                .unwrap_or_else(|| UserBadgeProgress::new(user.id, badge.id));
            let required = badge.required_achievement_ids.len();
            let completed = badge
                .required_achievement_ids
                .iter()
                .filter(|id| held.contains(id))
                .count();

            match row.evaluate(completed, required, now) {
                ProgressChange::Unchanged => {}
                ProgressChange::Advanced => badge_updates.push(row),
                ProgressChange::Unlocked => {
                    info!(
                        user_id = user.id,
                        badge_id = badge.id,
                        badge = %badge.name,
                        "Badge unlocked"
                    );
                    unlocked_badges.push(badge.clone());
                    badge_updates.push(row);
                }
            }
        }

        let commit = ProgressionCommit {
            purchase,
            achievement_progress: achievement_updates,
            badge_progress: badge_updates,
        };
        let purchase = match self.store.commit_progression(commit).await? {
            CommitOutcome::Committed(purchase) => purchase,
            CommitOutcome::Duplicate(existing) => {
                info!(
                    user_id = user.id,
                    purchase_id = existing.id,
                    "Purchase recorded concurrently for this payment reference"
                );
                return Ok(ProgressionResult::duplicate(user, existing));
            }
        };

        info!(
            user_id = user.id,
            purchase_id = purchase.id,
            amount = %purchase.amount,
            achievements = unlocked_achievements.len(),
            badges = unlocked_badges.len(),
            "Purchase processed"
        );

        for achievement in &unlocked_achievements {
            self.notifier
                .publish(Notification::achievement_unlocked(user.id, achievement, now));
        }
        for badge in &unlocked_badges {
            self.notifier
                .publish(Notification::badge_unlocked(user.id, badge, now));
        }

        Ok(ProgressionResult {
            user,
            purchase,
            unlocked_achievements,
            unlocked_badges,
            duplicate: false,
        })
    }

    /// Every catalog achievement with the user's standing towards it.
    pub async fn achievement_progress(&self, user_id: u64) -> Result<Vec<AchievementProgressView>> {
        self.require_user(user_id).await?;
        let rows: HashMap<u64, UserAchievementProgress> = self
            .store
            .achievement_progress(user_id)
            .await?
            .into_iter()
            .map(|row| (row.achievement_id, row))
            .collect();

        Ok(self
            .catalog
            .achievements()
            .iter()
            .map(|achievement| {
                let row = rows
                    .get(&achievement.id)
                    .cloned()
                    .unwrap_or_else(|| UserAchievementProgress::new(user_id, achievement.id));
                AchievementProgressView {
                    achievement_id: achievement.id,
                    name: achievement.name.clone(),
                    description: achievement.description.clone(),
                    progress: row.progress,
                    points_required: achievement.points_required,
                    percentage: row.percentage(achievement.points_required),
                    unlocked: row.unlocked,
                    unlocked_at: row.unlocked_at,
                }
            })
            .collect())
    }

    /// Every catalog badge with how many of its required achievements the user holds.
    pub async fn badge_progress(&self, user_id: u64) -> Result<Vec<BadgeProgressView>> {
        self.require_user(user_id).await?;
        let held: HashSet<u64> = self
            .store
            .achievement_progress(user_id)
            .await?
            .into_iter()
            .filter(|row| row.unlocked)
            .map(|row| row.achievement_id)
            .collect();
        let rows: HashMap<u64, UserBadgeProgress> = self
            .store
            .badge_progress(user_id)
            .await?
            .into_iter()
            .map(|row| (row.badge_id, row))
            .collect();

        Ok(self
            .catalog
            .badges()
            .iter()
            .map(|badge| {
                let required = badge.required_achievement_ids.len();
                let completed = badge
                    .required_achievement_ids
                    .iter()
                    .filter(|id| held.contains(id))
                    .count();
                let row = rows.get(&badge.id);
                let unlocked = row.is_some_and(|r| r.unlocked);
                BadgeProgressView {
                    badge_id: badge.id,
                    name: badge.name.clone(),
                    description: badge.description.clone(),
                    percentage: if unlocked {
                        Decimal::ONE_HUNDRED
                    } else {
                        completion_percentage(completed, required)
                    },
                    required_achievements: required,
                    completed_achievements: completed,
                    unlocked,
                    unlocked_at: row.and_then(|r| r.unlocked_at),
                }
            })
            .collect())
    }

    /// Badges the user has already unlocked, resolved against the catalog.
    pub async fn held_badges(&self, user_id: u64) -> Result<Vec<Badge>> {
        Ok(self
            .store
            .badge_progress(user_id)
            .await?
            .into_iter()
            .filter(|row| row.unlocked)
            .filter_map(|row| self.catalog.badge(row.badge_id).cloned())
            .collect())
    }

    async fn require_user(&self, user_id: u64) -> Result<User> {
        self.users
            .get(user_id)
            .await?
            .ok_or(LoyaltyError::UserNotFound(user_id))
    }

    async fn user_lock(&self, user_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        debug!(user_id, "Acquiring user progression lock");
        locks.entry(user_id).or_default().clone()
    }

    async fn release_user_lock(&self, user_id: u64, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        // Only the map and this handle left: no other event for the user is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::LoyaltyStore;
    use crate::infrastructure::in_memory::{InMemoryLoyaltyStore, InMemoryUserDirectory};
    use crate::infrastructure::notifier::ChannelNotifier;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: ProgressionEngine,
        store: InMemoryLoyaltyStore,
        notifications: UnboundedReceiver<Notification>,
    }

    fn fixture() -> Fixture {
        let users = InMemoryUserDirectory::with_users([
            User::new(1, "Ada", "ada@example.com"),
            User::new(2, "Bola", "bola@example.com"),
        ]);
        let store = InMemoryLoyaltyStore::new();
        let (notifier, notifications) = ChannelNotifier::channel();
        let engine = ProgressionEngine::new(
            Arc::new(users),
            Arc::new(store.clone()),
            Arc::new(Catalog::default()),
            Arc::new(notifier),
            Currency::default(),
        );
        Fixture {
            engine,
            store,
            notifications,
        }
    }

    // A Monday, so no weekend progress unless asked for.
    fn weekday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, 12, 0, 0).unwrap()
    }

    fn purchase(user_id: u64, amount: Decimal) -> PurchaseEvent {
        PurchaseEvent::new(user_id, amount).with_timestamp(weekday())
    }

    #[tokio::test]
    async fn test_first_purchase_unlocks_achievement_and_badge() {
        let mut fx = fixture();
        let result = fx.engine.process(purchase(1, dec!(1000))).await.unwrap();

        assert_eq!(result.purchase.id, 1);
        let achievements: Vec<&str> = result
            .unlocked_achievements
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        // 1000 in one purchase also clears the total-spent threshold.
        assert_eq!(achievements, vec!["First Purchase", "Big Spender"]);
        let badges: Vec<&str> = result.unlocked_badges.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(badges, vec!["Shopping Newbie"]);

        let first = fx.notifications.try_recv().unwrap();
        assert_eq!(first.event_name(), "achievement.unlocked");
        let mut names = vec![first.event_name()];
        while let Ok(n) = fx.notifications.try_recv() {
            names.push(n.event_name());
        }
        assert_eq!(
            names,
            vec!["achievement.unlocked", "achievement.unlocked", "badge.unlocked"]
        );
    }

    #[tokio::test]
    async fn test_unlocks_happen_once() {
        let fx = fixture();
        fx.engine.process(purchase(1, dec!(10))).await.unwrap();
        let second = fx.engine.process(purchase(1, dec!(10))).await.unwrap();

        assert!(second.unlocked_achievements.is_empty());
        assert!(second.unlocked_badges.is_empty());
        assert_eq!(second.purchase.id, 2);
    }

    #[tokio::test]
    async fn test_fifth_purchase_unlocks_regular_shopper() {
        let fx = fixture();
        for _ in 0..4 {
            fx.engine.process(purchase(1, dec!(10))).await.unwrap();
        }
        let fifth = fx.engine.process(purchase(1, dec!(10))).await.unwrap();

        assert_eq!(fifth.unlocked_achievements.len(), 1);
        assert_eq!(fifth.unlocked_achievements[0].name, "Loyal Customer");
        assert_eq!(fifth.unlocked_badges.len(), 1);
        assert_eq!(fifth.unlocked_badges[0].name, "Regular Shopper");

        let badges = fx.engine.badge_progress(1).await.unwrap();
        let vip = badges.iter().find(|b| b.name == "VIP Customer").unwrap();
        assert!(!vip.unlocked);
        assert_eq!(vip.completed_achievements, 1);
        assert_eq!(vip.percentage, dec!(50));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_frozen() {
        let fx = fixture();
        fx.engine.process(purchase(1, dec!(40))).await.unwrap();
        fx.engine.process(purchase(1, dec!(200))).await.unwrap();
        fx.engine.process(purchase(1, dec!(5))).await.unwrap();

        let rows = fx.store.achievement_progress(1).await.unwrap();
        let big_spender = rows.iter().find(|r| r.achievement_id == 3).unwrap();
        assert!(big_spender.unlocked);
        assert_eq!(big_spender.progress, 100);

        let view = fx.engine.achievement_progress(1).await.unwrap();
        let loyal = view.iter().find(|v| v.name == "Loyal Customer").unwrap();
        assert_eq!(loyal.progress, 3);
        assert_eq!(loyal.percentage, dec!(60));
        assert!(view.iter().find(|v| v.name == "Big Spender").unwrap().unlocked_at.is_some());
    }

    #[tokio::test]
    async fn test_weekend_purchases() {
        let fx = fixture();
        let saturday = Utc.with_ymd_and_hms(2025, 9, 6, 10, 0, 0).unwrap();
        let mut last = None;
        for _ in 0..3 {
            last = Some(
                fx.engine
                    .process(PurchaseEvent::new(2, dec!(1)).with_timestamp(saturday))
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();
        assert!(last.unlocked_achievements.iter().any(|a| a.name == "Weekend Warrior"));
    }

    #[tokio::test]
    async fn test_unknown_user_changes_nothing() {
        let mut fx = fixture();
        let err = fx.engine.process(purchase(42, dec!(10))).await.unwrap_err();

        assert!(matches!(err, LoyaltyError::UserNotFound(42)));
        assert!(fx.store.purchases_for_user(42).await.unwrap().is_empty());
        assert!(fx.notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_amount_is_rejected() {
        let fx = fixture();
        let err = fx.engine.process(purchase(1, dec!(-5))).await.unwrap_err();

        assert!(matches!(err, LoyaltyError::ValidationError(_)));
        assert!(fx.store.purchases_for_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_held_badges() {
        let fx = fixture();
        assert!(fx.engine.held_badges(1).await.unwrap().is_empty());
        fx.engine.process(purchase(1, dec!(10))).await.unwrap();

        let held = fx.engine.held_badges(1).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].name, "Shopping Newbie");
    }

    #[tokio::test]
    async fn test_repeated_payment_reference_is_not_recorded_twice() {
        let mut fx = fixture();
        let event = purchase(1, dec!(1000)).with_reference("PAY-REF-42");

        let first = fx.engine.process(event.clone()).await.unwrap();
        assert!(!first.duplicate);
        while fx.notifications.try_recv().is_ok() {}

        let again = fx.engine.process(event).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.purchase.id, first.purchase.id);
        assert!(again.unlocked_achievements.is_empty());
        assert!(again.unlocked_badges.is_empty());
        assert!(fx.notifications.try_recv().is_err());
        assert_eq!(fx.store.purchases_for_user(1).await.unwrap().len(), 1);

        // Without a reference every event is a new purchase.
        fx.engine.process(purchase(1, dec!(5))).await.unwrap();
        fx.engine.process(purchase(1, dec!(5))).await.unwrap();
        assert_eq!(fx.store.purchases_for_user(1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let fx = Arc::new(fixture().engine);
        let mut handles = Vec::new();
        for i in 0..20u64 {
            let engine = fx.clone();
            handles.push(tokio::spawn(async move {
                engine.process(purchase(1 + i % 2, dec!(3))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(fx.user_locks.lock().await.is_empty());
        assert_eq!(fx.achievement_progress(1).await.unwrap()[0].progress, 1);
    }

    #[tokio::test]
    async fn test_views_require_known_user() {
        let fx = fixture();
        assert!(matches!(
            fx.engine.achievement_progress(9).await,
            Err(LoyaltyError::UserNotFound(9))
        ));
        let fresh = fx.engine.achievement_progress(2).await.unwrap();
        assert_eq!(fresh.len(), 5);
        assert!(fresh.iter().all(|v| v.progress == 0 && !v.unlocked));
    }
}
