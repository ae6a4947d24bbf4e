use crate::domain::cashback::Cashback;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct CashbackRecord<'a> {
    id: u64,
    user_id: u64,
    purchase_id: u64,
    amount: Decimal,
    currency: &'a str,
    status: String,
    retryable: bool,
    retry_count: u32,
    failure_reason: &'a str,
    transaction_reference: &'a str,
    idempotency_key: &'a str,
}

impl<'a> From<&'a Cashback> for CashbackRecord<'a> {
    fn from(cashback: &'a Cashback) -> Self {
        Self {
            id: cashback.id,
            user_id: cashback.user_id,
            purchase_id: cashback.purchase_id,
            amount: cashback.amount,
            currency: cashback.currency.as_str(),
            status: cashback.status.to_string(),
            retryable: cashback.awaiting_retry(),
            retry_count: cashback.retry_count,
            failure_reason: cashback.failure_reason.as_deref().unwrap_or_default(),
            transaction_reference: cashback.transaction_reference.as_deref().unwrap_or_default(),
            idempotency_key: &cashback.idempotency_key,
        }
    }
}

/// Writes cashback records as CSV, one row per record with a header.
pub struct CashbackWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CashbackWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_cashbacks(&mut self, cashbacks: &[Cashback]) -> Result<()> {
        for cashback in cashbacks {
            self.writer.serialize(CashbackRecord::from(cashback))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
