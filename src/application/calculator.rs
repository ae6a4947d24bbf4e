use crate::config::CashbackConfig;
use crate::domain::catalog::{Achievement, Badge, Catalog};
use crate::domain::money::{Currency, round_money};
use crate::domain::progress::{UserAchievementProgress, UserBadgeProgress};
use crate::domain::purchase::Purchase;
use crate::domain::user::User;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredBy {
    pub achievements: Vec<String>,
    pub badges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationResult {
    pub eligible: bool,
    /// Final payout: zero when not eligible, otherwise within `[min, max]`.
    pub amount: Decimal,
    pub currency: Currency,
    pub base_amount: Decimal,
    pub bonus_amount: Decimal,
    pub multiplier: Decimal,
    pub triggered_by: TriggeredBy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CashbackLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

/// A configured way for a user to earn more cashback, with their standing towards it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CashbackScenario {
    Achievement {
        name: String,
        rate: Decimal,
        unlocked: bool,
        progress: u64,
        required: u64,
        description: String,
    },
    BadgeMultiplier {
        name: String,
        multiplier: Decimal,
        unlocked: bool,
        description: String,
    },
}

/// Computes cashback for a purchase from the unlocks it caused.
///
/// The calculation is pure: every input, including the badges the user
/// already held, is passed in by the caller.
#[derive(Debug, Clone)]
pub struct CashbackCalculator {
    config: CashbackConfig,
}

impl CashbackCalculator {
    pub fn new(config: CashbackConfig) -> Self {
        Self { config }
    }

    pub fn calculate(
        &self,
        user: &User,
        purchase: &Purchase,
        unlocked_achievements: &[Achievement],
        unlocked_badges: &[Badge],
        held_badges: &[Badge],
    ) -> CalculationResult {
        let amount = purchase.amount.value();
        let base_amount = amount * self.config.base_rate;

        let bonus_rate: Decimal = unlocked_achievements
            .iter()
            .map(|achievement| self.achievement_rate(&achievement.name))
            .sum();
        let bonus_amount = amount * bonus_rate;

        // Newly unlocked badges take precedence; otherwise the best badge already held applies.
        let multiplier_source = if unlocked_badges.is_empty() {
            held_badges
        } else {
            unlocked_badges
        };
        let multiplier = multiplier_source
            .iter()
            .map(|badge| self.badge_multiplier(badge))
            .fold(Decimal::ONE, Decimal::max);

        let calculated = round_money((base_amount + bonus_amount) * multiplier);
        let (eligible, final_amount) = self.apply_limits(calculated);

        let triggered_by = TriggeredBy {
            achievements: unlocked_achievements.iter().map(|a| a.name.clone()).collect(),
            badges: unlocked_badges.iter().map(|b| b.name.clone()).collect(),
        };

        info!(
            user_id = user.id,
            purchase_id = purchase.id,
            purchase_amount = %amount,
            base_cashback = %base_amount,
            bonus_cashback = %bonus_amount,
            multiplier = %multiplier,
            final_amount = %final_amount,
            achievements = ?triggered_by.achievements,
            badges = ?triggered_by.badges,
            "Cashback calculation completed"
        );

        CalculationResult {
            eligible,
            amount: final_amount,
            currency: purchase.currency.clone(),
            base_amount,
            bonus_amount,
            multiplier,
            triggered_by,
        }
    }

    fn apply_limits(&self, amount: Decimal) -> (bool, Decimal) {
        let mut amount = amount;
        if amount > self.config.max_cashback_amount {
            info!(
                original = %amount,
                max_limit = %self.config.max_cashback_amount,
                "Cashback amount capped at maximum"
            );
            amount = self.config.max_cashback_amount;
        }

        if amount < self.config.min_cashback_amount || amount <= Decimal::ZERO {
            info!(
                calculated = %amount,
                min_threshold = %self.config.min_cashback_amount,
                "Cashback amount below minimum threshold"
            );
            return (false, Decimal::ZERO);
        }
        (true, amount)
    }

    fn achievement_rate(&self, name: &str) -> Decimal {
        let rate = self
            .config
            .achievement_rates
            .get(name)
            .copied()
            .unwrap_or(Decimal::ZERO);
        debug!(achievement = name, rate = %rate, "Applied achievement bonus cashback rate");
        rate
    }

    fn badge_multiplier(&self, badge: &Badge) -> Decimal {
        self.config
            .badge_multipliers
            .get(&badge.name)
            .copied()
            .or(badge.cashback_multiplier)
            .unwrap_or(Decimal::ONE)
    }

    pub fn limits(&self) -> CashbackLimits {
        CashbackLimits {
            min_amount: self.config.min_cashback_amount,
            max_amount: self.config.max_cashback_amount,
        }
    }

    pub fn achievement_rates(&self) -> &BTreeMap<String, Decimal> {
        &self.config.achievement_rates
    }

    pub fn badge_multipliers(&self) -> &BTreeMap<String, Decimal> {
        &self.config.badge_multipliers
    }

    /// Lists every configured rate and multiplier the catalog knows about,
    /// annotated with the user's progress.
    pub fn eligible_scenarios(
        &self,
        catalog: &Catalog,
        achievement_progress: &[UserAchievementProgress],
        badge_progress: &[UserBadgeProgress],
    ) -> Vec<CashbackScenario> {
        let achievements = self.config.achievement_rates.iter().filter_map(|(name, rate)| {
            let achievement = catalog.achievements().iter().find(|a| &a.name == name)?;
            let progress = achievement_progress
                .iter()
                .find(|p| p.achievement_id == achievement.id);
            Some(CashbackScenario::Achievement {
                name: name.clone(),
                rate: *rate,
                unlocked: progress.is_some_and(|p| p.unlocked),
                progress: progress.map_or(0, |p| p.progress),
                required: achievement.points_required,
                description: achievement.description.clone(),
            })
        });

        let badges = self
            .config
            .badge_multipliers
            .iter()
            .filter_map(|(name, multiplier)| {
                let badge = catalog.badges().iter().find(|b| &b.name == name)?;
                Some(CashbackScenario::BadgeMultiplier {
                    name: name.clone(),
                    multiplier: *multiplier,
                    unlocked: badge_progress
                        .iter()
                        .any(|p| p.badge_id == badge.id && p.unlocked),
                    description: badge.description.clone(),
                })
            });

        achievements.chain(badges).collect()
    }
}
