use super::cashback::Cashback;
use super::catalog::{Achievement, Badge};
use super::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payload broadcast to users when loyalty or cashback state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "achievement.unlocked")]
    AchievementUnlocked {
        user_id: u64,
        achievement_id: u64,
        achievement_name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "badge.unlocked")]
    BadgeUnlocked {
        user_id: u64,
        badge_id: u64,
        badge_name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "cashback.initiated")]
    CashbackInitiated {
        user_id: u64,
        cashback_id: u64,
        amount: Decimal,
        currency: Currency,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "cashback.completed")]
    CashbackCompleted {
        user_id: u64,
        cashback_id: u64,
        amount: Decimal,
        currency: Currency,
        transaction_reference: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "cashback.failed")]
    CashbackFailed {
        user_id: u64,
        cashback_id: u64,
        amount: Decimal,
        currency: Currency,
        reason: String,
        retry_count: u32,
        will_retry: bool,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    pub fn achievement_unlocked(user_id: u64, achievement: &Achievement, now: DateTime<Utc>) -> Self {
        Notification::AchievementUnlocked {
            user_id,
            achievement_id: achievement.id,
            achievement_name: achievement.name.clone(),
            message: format!(
                "Congratulations! You've unlocked the '{}' achievement!",
                achievement.name
            ),
            timestamp: now,
        }
    }

    pub fn badge_unlocked(user_id: u64, badge: &Badge, now: DateTime<Utc>) -> Self {
        Notification::BadgeUnlocked {
            user_id,
            badge_id: badge.id,
            badge_name: badge.name.clone(),
            message: format!("Amazing! You've earned the '{}' badge!", badge.name),
            timestamp: now,
        }
    }

    pub fn cashback_initiated(cashback: &Cashback, now: DateTime<Utc>) -> Self {
        Notification::CashbackInitiated {
            user_id: cashback.user_id,
            cashback_id: cashback.id,
            amount: cashback.amount,
            currency: cashback.currency.clone(),
            message: format!(
                "Your cashback of {} {} is being processed.",
                cashback.amount, cashback.currency
            ),
            timestamp: now,
        }
    }

    pub fn cashback_completed(cashback: &Cashback, now: DateTime<Utc>) -> Self {
        Notification::CashbackCompleted {
            user_id: cashback.user_id,
            cashback_id: cashback.id,
            amount: cashback.amount,
            currency: cashback.currency.clone(),
            transaction_reference: cashback.transaction_reference.clone().unwrap_or_default(),
            message: format!(
                "Your cashback of {} {} has been paid.",
                cashback.amount, cashback.currency
            ),
            timestamp: now,
        }
    }

    pub fn cashback_failed(cashback: &Cashback, reason: &str, will_retry: bool, now: DateTime<Utc>) -> Self {
        let message = if will_retry {
            "Your cashback payment is being retried. We'll notify you once it's processed."
        } else {
            "We encountered an issue processing your cashback. Our team has been notified."
        };
        Notification::CashbackFailed {
            user_id: cashback.user_id,
            cashback_id: cashback.id,
            amount: cashback.amount,
            currency: cashback.currency.clone(),
            reason: reason.to_string(),
            retry_count: cashback.retry_count,
            will_retry,
            message: message.to_string(),
            timestamp: now,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::AchievementUnlocked { .. } => "achievement.unlocked",
            Notification::BadgeUnlocked { .. } => "badge.unlocked",
            Notification::CashbackInitiated { .. } => "cashback.initiated",
            Notification::CashbackCompleted { .. } => "cashback.completed",
            Notification::CashbackFailed { .. } => "cashback.failed",
        }
    }

    pub fn user_id(&self) -> u64 {
        match self {
            Notification::AchievementUnlocked { user_id, .. }
            | Notification::BadgeUnlocked { user_id, .. }
            | Notification::CashbackInitiated { user_id, .. }
            | Notification::CashbackCompleted { user_id, .. }
            | Notification::CashbackFailed { user_id, .. } => *user_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notification::AchievementUnlocked { message, .. }
            | Notification::BadgeUnlocked { message, .. }
            | Notification::CashbackInitiated { message, .. }
            | Notification::CashbackCompleted { message, .. }
            | Notification::CashbackFailed { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Catalog;

    #[test]
    fn test_achievement_notification_payload() {
        let catalog = Catalog::default();
        let achievement = catalog.achievement(1).unwrap();
        let notification = Notification::achievement_unlocked(7, achievement, Utc::now());

        assert_eq!(notification.event_name(), "achievement.unlocked");
        assert_eq!(notification.user_id(), 7);
        assert!(notification.message().contains("First Purchase"));

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "achievement.unlocked");
        assert_eq!(json["achievement_id"], 1);
    }
}
