use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of re-evaluating a progress row against fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    Unchanged,
    Advanced,
    Unlocked,
}

/// A user's progress towards one achievement.
///
/// Once unlocked the row is frozen: progress, flag and timestamp never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievementProgress {
    pub user_id: u64,
    pub achievement_id: u64,
    pub progress: u64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl UserAchievementProgress {
    pub fn new(user_id: u64, achievement_id: u64) -> Self {
        Self {
            user_id,
            achievement_id,
            progress: 0,
            unlocked: false,
            unlocked_at: None,
        }
    }

    pub fn advance(
        &mut self,
        observed: u64,
        points_required: u64,
        now: DateTime<Utc>,
    ) -> ProgressChange {
        if self.unlocked {
            return ProgressChange::Unchanged;
        }

        let next = self.progress.max(observed);
        if next >= points_required {
            self.progress = points_required;
            self.unlocked = true;
            self.unlocked_at = Some(now);
            ProgressChange::Unlocked
        } else if next > self.progress {
            self.progress = next;
            ProgressChange::Advanced
        } else {
            ProgressChange::Unchanged
        }
    }

    pub fn percentage(&self, points_required: u64) -> Decimal {
        if points_required == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.progress) * Decimal::ONE_HUNDRED / Decimal::from(points_required))
            .round_dp(2)
    }
}

/// A user's progress towards one badge, as a completion percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBadgeProgress {
    pub user_id: u64,
    pub badge_id: u64,
    pub progress: Decimal,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl UserBadgeProgress {
    pub fn new(user_id: u64, badge_id: u64) -> Self {
        Self {
            user_id,
            badge_id,
            progress: Decimal::ZERO,
            unlocked: false,
            unlocked_at: None,
        }
    }

    /// Re-evaluates against the number of required achievements the user holds.
    ///
    /// A badge without requirements stays locked.
    pub fn evaluate(&mut self, completed: usize, required: usize, now: DateTime<Utc>) -> ProgressChange {
        if self.unlocked {
            return ProgressChange::Unchanged;
        }

        let ratio = completion_percentage(completed, required);
        if required > 0 && completed >= required {
            self.progress = Decimal::ONE_HUNDRED;
            self.unlocked = true;
            self.unlocked_at = Some(now);
            ProgressChange::Unlocked
        } else if ratio > self.progress {
            self.progress = ratio;
            ProgressChange::Advanced
        } else {
            ProgressChange::Unchanged
        }
    }
}

pub fn completion_percentage(completed: usize, required: usize) -> Decimal {
    if required == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(completed.min(required)) * Decimal::ONE_HUNDRED / Decimal::from(required))
        .round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_achievement_unlock_freezes_progress() {
        let now = Utc::now();
        let mut progress = UserAchievementProgress::new(1, 1);

        assert_eq!(progress.advance(2, 5, now), ProgressChange::Advanced);
        assert_eq!(progress.progress, 2);

        assert_eq!(progress.advance(7, 5, now), ProgressChange::Unlocked);
        assert_eq!(progress.progress, 5);
        assert!(progress.unlocked);
        assert_eq!(progress.unlocked_at, Some(now));

        let later = now + chrono::Duration::minutes(1);
        assert_eq!(progress.advance(50, 5, later), ProgressChange::Unchanged);
        assert_eq!(progress.progress, 5);
        assert_eq!(progress.unlocked_at, Some(now));
    }

    #[test]
    fn test_achievement_progress_never_decreases() {
        let mut progress = UserAchievementProgress::new(1, 3);
        progress.advance(80, 100, Utc::now());
        assert_eq!(progress.advance(40, 100, Utc::now()), ProgressChange::Unchanged);
        assert_eq!(progress.progress, 80);
        assert_eq!(progress.percentage(100), dec!(80));
    }

    #[test]
    fn test_badge_half_complete() {
        let mut badge = UserBadgeProgress::new(1, 2);
        assert_eq!(badge.evaluate(1, 2, Utc::now()), ProgressChange::Advanced);
        assert_eq!(badge.progress, dec!(50));
        assert!(!badge.unlocked);

        assert_eq!(badge.evaluate(2, 2, Utc::now()), ProgressChange::Unlocked);
        assert!(badge.unlocked);
        assert_eq!(badge.progress, dec!(100));
    }

    #[test]
    fn test_badge_without_requirements_stays_locked() {
        let mut badge = UserBadgeProgress::new(1, 9);
        assert_eq!(badge.evaluate(0, 0, Utc::now()), ProgressChange::Unchanged);
        assert!(!badge.unlocked);
    }

    #[test]
    fn test_completion_percentage_rounding() {
        assert_eq!(completion_percentage(1, 3), dec!(33.33));
        assert_eq!(completion_percentage(0, 4), dec!(0));
    }
}
