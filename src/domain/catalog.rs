use super::purchase::Purchase;
use crate::error::{LoyaltyError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How progress towards an achievement is measured from a user's purchase history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementRule {
    /// Number of purchases.
    #[default]
    PurchaseCount,
    /// Sum of purchase amounts, whole units only.
    TotalSpent,
    /// Number of purchases made on a Saturday or Sunday.
    WeekendCount,
}

impl AchievementRule {
    pub fn evaluate(&self, purchases: &[Purchase]) -> u64 {
        match self {
            AchievementRule::PurchaseCount => purchases.len() as u64,
            AchievementRule::TotalSpent => purchases
                .iter()
                .map(|p| p.amount.value())
                .sum::<Decimal>()
                .trunc()
                .to_u64()
                .unwrap_or(u64::MAX),
            AchievementRule::WeekendCount => {
                purchases.iter().filter(|p| p.is_weekend()).count() as u64
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points_required: u64,
    #[serde(default)]
    pub rule: AchievementRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_achievement_ids: Vec<u64>,
    /// Multiplier used when no configured multiplier exists for this badge name.
    #[serde(default)]
    pub cashback_multiplier: Option<Decimal>,
}

/// The static set of achievements and badges, validated on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    achievements: Vec<Achievement>,
    badges: Vec<Badge>,
}

impl Catalog {
    pub fn new(achievements: Vec<Achievement>, badges: Vec<Badge>) -> Result<Self> {
        let catalog = Self {
            achievements,
            badges,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for achievement in &self.achievements {
            if !ids.insert(achievement.id) {
                return Err(LoyaltyError::ConfigError(format!(
                    "Duplicate achievement id {}",
                    achievement.id
                )));
            }
            if achievement.points_required == 0 {
                return Err(LoyaltyError::ConfigError(format!(
                    "Achievement '{}' must require at least one point",
                    achievement.name
                )));
            }
        }

        let mut badge_ids = HashSet::new();
        for badge in &self.badges {
            if !badge_ids.insert(badge.id) {
                return Err(LoyaltyError::ConfigError(format!(
                    "Duplicate badge id {}",
                    badge.id
                )));
            }
            if let Some(missing) = badge
                .required_achievement_ids
                .iter()
                .find(|id| !ids.contains(id))
            {
                return Err(LoyaltyError::ConfigError(format!(
                    "Badge '{}' requires unknown achievement {}",
                    badge.name, missing
                )));
            }
        }
        Ok(())
    }

    pub fn achievements(&self) -> &[Achievement] {
        &self.achievements
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn achievement(&self, id: u64) -> Option<&Achievement> {
        self.achievements.iter().find(|a| a.id == id)
    }

    pub fn badge(&self, id: u64) -> Option<&Badge> {
        self.badges.iter().find(|b| b.id == id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let achievement = |id, name: &str, description: &str, points_required, rule| Achievement {
            id,
            name: name.to_string(),
            description: description.to_string(),
            points_required,
            rule,
        };
        let badge = |id, name: &str, description: &str, required: &[u64]| Badge {
            id,
            name: name.to_string(),
            description: description.to_string(),
            required_achievement_ids: required.to_vec(),
            cashback_multiplier: None,
        };

        Self {
            achievements: vec![
                achievement(1, "First Purchase", "Make your first purchase", 1, AchievementRule::PurchaseCount),
                achievement(2, "Loyal Customer", "Make 5 purchases", 5, AchievementRule::PurchaseCount),
                achievement(3, "Big Spender", "Spend 100 or more in total", 100, AchievementRule::TotalSpent),
                achievement(4, "Weekend Warrior", "Make 3 purchases on weekends", 3, AchievementRule::WeekendCount),
                achievement(5, "Shopaholic", "Make 10 purchases", 10, AchievementRule::PurchaseCount),
            ],
            badges: vec![
                badge(1, "Shopping Newbie", "You've made your first purchase", &[1]),
                badge(2, "Regular Shopper", "You're becoming a regular", &[1, 2]),
                badge(3, "VIP Customer", "Thanks for your loyalty and spending", &[2, 3]),
                badge(4, "Shopping Champion", "Ultimate loyalty status", &[2, 3, 4, 5]),
            ],
        }
    }
}
