use super::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: u64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub cashback_id: u64,
    pub purchase_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A payout instruction sent to the payment gateway.
///
/// `reference` carries the cashback idempotency key so the provider can
/// reject duplicates on its side too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub recipient: Recipient,
    pub reference: String,
    pub metadata: TransferMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferErrorCode {
    NetworkTimeout,
    InsufficientFunds,
    ServiceUnavailable,
    UnknownError,
}

impl std::fmt::Display for TransferErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            TransferErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            TransferErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            TransferErrorCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(code)
    }
}

/// Structured gateway answer. A failed transfer is data, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub success: bool,
    pub transaction_reference: String,
    pub error_code: Option<TransferErrorCode>,
    pub message: String,
}

impl TransferResponse {
    pub fn succeeded(transaction_reference: String) -> Self {
        Self {
            success: true,
            transaction_reference,
            error_code: None,
            message: "Transfer completed successfully".to_string(),
        }
    }

    pub fn failed(transaction_reference: String, code: TransferErrorCode, message: &str) -> Self {
        Self {
            success: false,
            transaction_reference,
            error_code: Some(code),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Completed,
    Pending,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub transaction_reference: String,
    pub status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&TransferErrorCode::InsufficientFunds).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_FUNDS\"");
        let code: TransferErrorCode = serde_json::from_str("\"NETWORK_TIMEOUT\"").unwrap();
        assert_eq!(code, TransferErrorCode::NetworkTimeout);
        assert_eq!(code.to_string(), "NETWORK_TIMEOUT");
    }
}
