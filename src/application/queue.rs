use crate::domain::purchase::PurchaseEvent;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Default)]
struct QueueState {
    pending: Vec<PurchaseEvent>,
    /// Handed to a drain but not yet acknowledged.
    in_flight: Vec<PurchaseEvent>,
}

/// Ordered, at-least-once buffer of inbound purchase events.
///
/// Producers may enqueue concurrently; a drain takes the whole pending buffer
/// in one step, so events enqueued while a drain is being processed belong to
/// the next drain. When a journal file is configured every change is written
/// through to it, and drained events stay in the journal until the drain is
/// acknowledged.
pub struct PurchaseEventQueue {
    state: Mutex<QueueState>,
    journal: Option<PathBuf>,
}

impl Default for PurchaseEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PurchaseEventQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            journal: None,
        }
    }

    /// Opens a journal-backed queue, restoring any events left by a previous process.
    pub async fn with_journal<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pending: Vec<PurchaseEvent> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };
        if !pending.is_empty() {
            info!(count = pending.len(), journal = %path.display(), "Restored purchase events from journal");
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                pending,
                in_flight: Vec::new(),
            }),
            journal: Some(path),
        })
    }

    pub async fn enqueue(&self, event: PurchaseEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        let user_id = event.user_id;
        state.pending.push(event);
        if let Err(error) = self.persist(&state).await {
            state.pending.pop();
            return Err(error);
        }
        info!(user_id, pending = state.pending.len(), "Purchase event added to queue");
        Ok(())
    }

    /// Takes every pending event, in enqueue order, leaving the buffer empty.
    pub async fn drain(&self) -> Result<Vec<PurchaseEvent>> {
        let mut state = self.state.lock().await;
        let batch = std::mem::take(&mut state.pending);
        let already_in_flight = state.in_flight.len();
        state.in_flight.extend(batch.iter().cloned());
        if let Err(error) = self.persist(&state).await {
            state.in_flight.truncate(already_in_flight);
            state.pending = batch;
            return Err(error);
        }
        debug!(count = batch.len(), "Queue drained");
        Ok(batch)
    }

    /// Marks every drained event as attempted.
    pub async fn acknowledge(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let acknowledged = state.in_flight.len();
        state.in_flight.clear();
        self.persist(&state).await?;
        info!(acknowledged, "Queue cleared");
        Ok(())
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn persist(&self, state: &QueueState) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let snapshot: Vec<&PurchaseEvent> =
            state.in_flight.iter().chain(state.pending.iter()).collect();
        let body = serde_json::to_vec(&snapshot)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
