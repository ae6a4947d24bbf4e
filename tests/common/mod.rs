#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use loyalty_engine::application::calculator::CashbackCalculator;
use loyalty_engine::application::pipeline::LoyaltyPipeline;
use loyalty_engine::application::progression::ProgressionEngine;
use loyalty_engine::application::queue::PurchaseEventQueue;
use loyalty_engine::application::settlement::SettlementService;
use loyalty_engine::config::LoyaltyConfig;
use loyalty_engine::domain::notification::Notification;
use loyalty_engine::domain::ports::{NotificationSink, PaymentGateway};
use loyalty_engine::domain::purchase::PurchaseEvent;
use loyalty_engine::domain::transfer::{
    TransferErrorCode, TransferRequest, TransferResponse, VerificationResponse, VerificationStatus,
};
use loyalty_engine::domain::user::User;
use loyalty_engine::error::{LoyaltyError, Result};
use loyalty_engine::infrastructure::in_memory::{
    InMemoryCashbackStore, InMemoryLoyaltyStore, InMemoryUserDirectory,
};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Scripted {
    Success,
    Fail(TransferErrorCode),
    /// The call itself breaks instead of returning a structured failure.
    Error(String),
}

/// Gateway that replays a fixed script, then succeeds once it runs out.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransferRequest>>,
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn always_succeeds() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn initialize_transfer(&self, request: &TransferRequest) -> Result<TransferResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Success);

        let reference = format!("TXN_SCRIPTED{:04}", call);
        match next {
            Scripted::Success => Ok(TransferResponse::succeeded(reference)),
            Scripted::Fail(code) => Ok(TransferResponse::failed(reference, code, "scripted failure")),
            Scripted::Error(message) => Err(LoyaltyError::Gateway(message)),
        }
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerificationResponse> {
        Ok(VerificationResponse {
            transaction_reference: reference.to_string(),
            status: VerificationStatus::Completed,
            verified_at: Some(Utc::now()),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<&'static str> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.event_name())
            .collect()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.published.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn publish(&self, notification: Notification) {
        self.published.lock().unwrap().push(notification);
    }
}

/// Pipeline over in-memory stores with handles to every collaborator.
pub struct Harness {
    pub loyalty: InMemoryLoyaltyStore,
    pub cashbacks: InMemoryCashbackStore,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: LoyaltyPipeline,
}

impl Harness {
    pub fn new(gateway: ScriptedGateway) -> Self {
        Self::with_config(LoyaltyConfig::default(), gateway)
    }

    pub fn with_config(config: LoyaltyConfig, gateway: ScriptedGateway) -> Self {
        let users = Arc::new(InMemoryUserDirectory::with_users(
            (1..=5).map(|id| User::new(id, &format!("user{}", id), &format!("user{}@example.com", id))),
        ));
        let loyalty = InMemoryLoyaltyStore::new();
        let cashbacks = InMemoryCashbackStore::new();
        let gateway = Arc::new(gateway);
        let notifier = Arc::new(RecordingNotifier::default());

        let engine = ProgressionEngine::new(
            users.clone(),
            Arc::new(loyalty.clone()),
            Arc::new(config.catalog.clone()),
            notifier.clone(),
            config.cashback.default_currency.clone(),
        );
        let settlement = SettlementService::new(
            CashbackCalculator::new(config.cashback.clone()),
            Arc::new(cashbacks.clone()),
            gateway.clone(),
            users,
            notifier.clone(),
            config.retry.clone(),
            Duration::from_millis(config.gateway.timeout_ms),
        );
        let pipeline = LoyaltyPipeline::new(Arc::new(PurchaseEventQueue::new()), engine, settlement);

        Self {
            loyalty,
            cashbacks,
            gateway,
            notifier,
            pipeline,
        }
    }
}

/// A Monday, so purchases do not count towards weekend achievements.
pub fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 8, 12, 0, 0).unwrap()
}

pub fn saturday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap()
}

pub fn purchase(user_id: u64, amount: Decimal) -> PurchaseEvent {
    PurchaseEvent::new(user_id, amount).with_timestamp(monday())
}

pub fn write_users_csv(path: &Path, ids: &[u64]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["id", "name", "email"])?;
    for id in ids {
        wtr.write_record([
            id.to_string(),
            format!("user{}", id),
            format!("user{}@example.com", id),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_events_csv(path: &Path, rows: &[(u64, &str)]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["user_id", "amount", "currency", "payment_method", "timestamp"])?;
    for (user_id, amount) in rows {
        wtr.write_record([
            user_id.to_string().as_str(),
            *amount,
            "NGN",
            "card",
            "2025-09-08T12:00:00Z",
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Config JSON for CLI runs: a gateway that always succeeds instantly.
pub fn write_instant_config(path: &Path, success_rate: f64) -> std::result::Result<(), Error> {
    let failure = 1.0 - success_rate;
    let config = serde_json::json!({
        "retry": { "max_attempts": 3, "delay_minutes": [0, 0, 0] },
        "gateway": {
            "success_rate": success_rate,
            "network_timeout_rate": failure,
            "insufficient_funds_rate": 0.0,
            "processing_delay_ms": [0, 0],
            "timeout_ms": 5000
        }
    });
    std::fs::write(path, serde_json::to_vec_pretty(&config)?)
}
