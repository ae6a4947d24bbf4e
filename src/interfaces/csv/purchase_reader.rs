use crate::domain::purchase::PurchaseEvent;
use crate::error::{LoyaltyError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of a purchase events file. Only `user_id` and `amount` are required.
#[derive(Debug, Deserialize)]
struct PurchaseRecord {
    user_id: u64,
    amount: Decimal,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    payment_reference: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl From<PurchaseRecord> for PurchaseEvent {
    fn from(record: PurchaseRecord) -> Self {
        PurchaseEvent {
            user_id: record.user_id,
            amount: record.amount,
            currency: record.currency,
            payment_method: record.payment_method,
            payment_reference: record.payment_reference,
            status: record.status,
            timestamp: record.timestamp,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Reads purchase events from a CSV source.
///
/// Whitespace is trimmed and trailing optional columns may be omitted.
/// Field validation is left to the progression engine, so a row with a
/// negative amount still comes out as an event.
pub struct PurchaseReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PurchaseReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes events, one `Result` per row.
    pub fn events(self) -> impl Iterator<Item = Result<PurchaseEvent>> {
        self.reader
            .into_deserialize::<PurchaseRecord>()
            .map(|result| result.map(PurchaseEvent::from).map_err(LoyaltyError::from))
    }
}
