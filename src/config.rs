//! Named configuration for cashback rates, retry policy and the mock gateway.
//!
//! Values come from built-in defaults, optionally replaced by a JSON file and
//! finally by environment variables.

use crate::domain::catalog::Catalog;
use crate::domain::money::Currency;
use crate::error::{LoyaltyError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CashbackConfig {
    pub base_rate: Decimal,
    pub achievement_rates: BTreeMap<String, Decimal>,
    pub badge_multipliers: BTreeMap<String, Decimal>,
    pub min_cashback_amount: Decimal,
    pub max_cashback_amount: Decimal,
    pub default_currency: Currency,
}

impl Default for CashbackConfig {
    fn default() -> Self {
        let achievement_rates = [
            ("First Purchase", dec!(0.02)),
            ("Big Spender", dec!(0.05)),
            ("Loyal Customer", dec!(0.03)),
            ("Weekend Warrior", dec!(0.04)),
        ];
        let badge_multipliers = [
            ("Bronze Badge", dec!(1.0)),
            ("Silver Badge", dec!(1.2)),
            ("Gold Badge", dec!(1.5)),
            ("Platinum Badge", dec!(2.0)),
        ];

        Self {
            base_rate: dec!(0.01),
            achievement_rates: achievement_rates
                .into_iter()
                .map(|(name, rate)| (name.to_string(), rate))
                .collect(),
            badge_multipliers: badge_multipliers
                .into_iter()
                .map(|(name, multiplier)| (name.to_string(), multiplier))
                .collect(),
            min_cashback_amount: dec!(10),
            max_cashback_amount: dec!(10000),
            default_currency: Currency::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Backoff before each retry, indexed by the cashback's retry count.
    pub delay_minutes: Vec<u64>,
    /// Age after which an attempt that never recorded its result is retried.
    pub stale_after_minutes: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_minutes: vec![0, 5, 30],
            stale_after_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub success_rate: f64,
    pub network_timeout_rate: f64,
    pub insufficient_funds_rate: f64,
    /// Inclusive `[min, max]` simulated processing delay.
    pub processing_delay_ms: [u64; 2],
    /// Upper bound on a single gateway call before it counts as a timeout.
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.8,
            network_timeout_rate: 0.1,
            insufficient_funds_rate: 0.05,
            processing_delay_ms: [100, 500],
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoyaltyConfig {
    pub cashback: CashbackConfig,
    pub retry: RetryConfig,
    pub gateway: GatewayConfig,
    pub catalog: Catalog,
}

impl LoyaltyConfig {
    /// Loads defaults, the optional JSON file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "CASHBACK_MIN_AMOUNT", &mut self.cashback.min_cashback_amount)?;
        override_value(&lookup, "CASHBACK_MAX_AMOUNT", &mut self.cashback.max_cashback_amount)?;
        override_value(&lookup, "CASHBACK_MAX_RETRY_ATTEMPTS", &mut self.retry.max_attempts)?;
        override_value(&lookup, "PAYMENT_MOCK_SUCCESS_RATE", &mut self.gateway.success_rate)?;
        override_value(&lookup, "PAYMENT_MOCK_TIMEOUT_RATE", &mut self.gateway.network_timeout_rate)?;
        override_value(
            &lookup,
            "PAYMENT_MOCK_INSUFFICIENT_FUNDS_RATE",
            &mut self.gateway.insufficient_funds_rate,
        )?;
        override_value(&lookup, "PAYMENT_MOCK_MIN_DELAY", &mut self.gateway.processing_delay_ms[0])?;
        override_value(&lookup, "PAYMENT_MOCK_MAX_DELAY", &mut self.gateway.processing_delay_ms[1])?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let cashback = &self.cashback;
        if cashback.base_rate < Decimal::ZERO {
            return Err(config_error("cashback.base_rate must not be negative"));
        }
        if let Some((name, _)) = cashback
            .achievement_rates
            .iter()
            .find(|(_, rate)| **rate < Decimal::ZERO)
        {
            return Err(config_error(&format!(
                "cashback.achievement_rates['{}'] must not be negative",
                name
            )));
        }
        if let Some((name, _)) = cashback
            .badge_multipliers
            .iter()
            .find(|(_, multiplier)| **multiplier <= Decimal::ZERO)
        {
            return Err(config_error(&format!(
                "cashback.badge_multipliers['{}'] must be positive",
                name
            )));
        }
        if cashback.min_cashback_amount < Decimal::ZERO
            || cashback.min_cashback_amount > cashback.max_cashback_amount
        {
            return Err(config_error(
                "cashback.min_cashback_amount must be between 0 and max_cashback_amount",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        if self.retry.delay_minutes.is_empty() {
            return Err(config_error("retry.delay_minutes must not be empty"));
        }

        let gateway = &self.gateway;
        let rates = [
            gateway.success_rate,
            gateway.network_timeout_rate,
            gateway.insufficient_funds_rate,
        ];
        if rates.iter().any(|rate| !(0.0..=1.0).contains(rate)) {
            return Err(config_error("gateway rates must be within [0, 1]"));
        }
        if rates.iter().sum::<f64>() > 1.0 + f64::EPSILON {
            return Err(config_error("gateway rates must not sum above 1"));
        }
        if gateway.processing_delay_ms[0] > gateway.processing_delay_ms[1] {
            return Err(config_error("gateway.processing_delay_ms must be [min, max]"));
        }
        if gateway.timeout_ms == 0 {
            return Err(config_error("gateway.timeout_ms must be positive"));
        }

        self.catalog.validate()
    }
}

fn override_value<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| config_error(&format!("{} has an invalid value '{}'", key, raw)))?;
    }
    Ok(())
}

fn config_error(message: &str) -> LoyaltyError {
    LoyaltyError::ConfigError(message.to_string())
}
