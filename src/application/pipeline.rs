use crate::application::progression::{ProgressionEngine, ProgressionResult};
use crate::application::queue::PurchaseEventQueue;
use crate::application::settlement::{CashbackOutcome, SettlementService};
use crate::domain::purchase::PurchaseEvent;
use crate::error::{FailureKind, LoyaltyError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Why an event, or the cashback step of an event, did not go through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFailure {
    pub user_id: u64,
    /// Set when the purchase was stored before the failure happened.
    pub purchase_id: Option<u64>,
    pub kind: FailureKind,
    pub reason: String,
}

impl EventFailure {
    fn new(user_id: u64, purchase_id: Option<u64>, error: &LoyaltyError) -> Self {
        Self {
            user_id,
            purchase_id,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub progression: ProgressionResult,
    /// The purchase is stored either way; only the cashback step can fail here.
    pub cashback: std::result::Result<CashbackOutcome, EventFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    Processed(ProcessedEvent),
    Failed(EventFailure),
}

impl EventResult {
    pub fn is_processed(&self) -> bool {
        matches!(self, EventResult::Processed(_))
    }
}

/// Queue, progression and settlement wired together.
///
/// Drains are serialized and process events one by one in enqueue order.
/// Settlement for an event starts only after its progression has committed.
pub struct LoyaltyPipeline {
    queue: Arc<PurchaseEventQueue>,
    engine: ProgressionEngine,
    settlement: SettlementService,
    drain_lock: Mutex<()>,
}

impl LoyaltyPipeline {
    pub fn new(
        queue: Arc<PurchaseEventQueue>,
        engine: ProgressionEngine,
        settlement: SettlementService,
    ) -> Self {
        Self {
            queue,
            engine,
            settlement,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &ProgressionEngine {
        &self.engine
    }

    pub fn settlement(&self) -> &SettlementService {
        &self.settlement
    }

    pub async fn submit_purchase_event(&self, event: PurchaseEvent) -> Result<()> {
        self.queue.enqueue(event).await
    }

    pub async fn pending(&self) -> usize {
        self.queue.size().await
    }

    /// Processes everything currently queued and returns one result per event.
    ///
    /// Per-event failures are reported in the results. An `Err` means the
    /// queue itself could not be read or acknowledged.
    pub async fn drain_and_process(&self) -> Result<Vec<EventResult>> {
        let _guard = self.drain_lock.lock().await;

        let batch = self.queue.drain().await?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = batch.len(), "Processing purchase queue");

        let mut results = Vec::with_capacity(batch.len());
        for event in batch {
            results.push(self.process_event(event).await);
        }
        self.queue.acknowledge().await?;

        let processed = results.iter().filter(|r| r.is_processed()).count();
        info!(
            processed,
            failed = results.len() - processed,
            "Purchase queue processing completed"
        );
        Ok(results)
    }

    pub async fn process_event(&self, event: PurchaseEvent) -> EventResult {
        let user_id = event.user_id;
        let progression = match self.engine.process(event).await {
            Ok(progression) => progression,
            Err(err) => {
                warn!(user_id, error = %err, "Failed to process purchase event");
                return EventResult::Failed(EventFailure::new(user_id, None, &err));
            }
        };

        let cashback = self.settle(&progression).await.map_err(|err| {
            error!(
                user_id,
                purchase_id = progression.purchase.id,
                error = %err,
                "Failed to process cashback for purchase"
            );
            EventFailure::new(user_id, Some(progression.purchase.id), &err)
        });

        EventResult::Processed(ProcessedEvent {
            progression,
            cashback,
        })
    }

    async fn settle(&self, progression: &ProgressionResult) -> Result<CashbackOutcome> {
        let held_badges = self.engine.held_badges(progression.user.id).await?;
        self.settlement
            .process_cashback_for_purchase(
                &progression.user,
                &progression.purchase,
                &progression.unlocked_achievements,
                &progression.unlocked_badges,
                &held_badges,
            )
            .await
    }
}
