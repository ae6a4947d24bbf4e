use super::money::{Amount, Currency};
use crate::error::{LoyaltyError, Result};
use chrono::{DateTime, Datelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAYMENT_METHOD: &str = "unknown";
pub const DEFAULT_PURCHASE_STATUS: &str = "completed";

/// Raw purchase notification as submitted by a producer.
///
/// Fields are deliberately loose: validation happens when the event is
/// turned into a [`NewPurchase`], and a malformed event becomes a failed
/// queue result rather than a rejected enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub user_id: u64,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PurchaseEvent {
    pub fn new(user_id: u64, amount: Decimal) -> Self {
        Self {
            user_id,
            amount,
            currency: None,
            payment_method: None,
            payment_reference: None,
            status: None,
            timestamp: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    pub fn with_payment_method(mut self, method: &str) -> Self {
        self.payment_method = Some(method.to_string());
        self
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.payment_reference = Some(reference.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validates the event and fills in defaults.
    ///
    /// `received_at` stands in for a missing event timestamp.
    pub fn into_new_purchase(
        self,
        default_currency: &Currency,
        received_at: DateTime<Utc>,
    ) -> Result<NewPurchase> {
        if self.user_id == 0 {
            return Err(LoyaltyError::ValidationError(
                "user_id is required".to_string(),
            ));
        }
        let amount = Amount::new(self.amount)?;
        let currency = match self.currency.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Currency::new(code)?,
            _ => default_currency.clone(),
        };

        Ok(NewPurchase {
            user_id: self.user_id,
            amount,
            currency,
            payment_method: non_blank(self.payment_method)
                .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
            payment_reference: non_blank(self.payment_reference),
            status: non_blank(self.status).unwrap_or_else(|| DEFAULT_PURCHASE_STATUS.to_string()),
            purchased_at: self.timestamp.unwrap_or(received_at),
            metadata: self.metadata,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A validated purchase that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchase {
    pub user_id: u64,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub status: String,
    pub purchased_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl NewPurchase {
    /// The stored purchase carrying the same payment reference, if any.
    ///
    /// Purchases without a reference never match.
    pub fn find_recorded<'a>(&self, stored: &'a [Purchase]) -> Option<&'a Purchase> {
        let reference = self.payment_reference.as_deref()?;
        stored.iter().find(|purchase| {
            purchase.user_id == self.user_id
                && purchase.payment_reference.as_deref() == Some(reference)
        })
    }

    pub fn into_purchase(self, id: u64) -> Purchase {
        Purchase {
            id,
            user_id: self.user_id,
            amount: self.amount,
            currency: self.currency,
            payment_method: self.payment_method,
            payment_reference: self.payment_reference,
            status: self.status,
            purchased_at: self.purchased_at,
            metadata: self.metadata,
        }
    }
}

/// A completed purchase. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: u64,
    pub user_id: u64,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub status: String,
    pub purchased_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Purchase {
    pub fn is_weekend(&self) -> bool {
        matches!(self.purchased_at.weekday(), Weekday::Sat | Weekday::Sun)
    }
}
