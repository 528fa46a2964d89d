use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the ledger after a transaction commits. Emission is
/// best-effort: a full channel or dropped receiver never unwinds a committed
/// movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockMovementApplied {
        movement_id: i64,
        product_id: Uuid,
        movement_type: String,
        amount: i32,
        previous_quantity: i32,
        new_quantity: i32,
        actor_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
    },
    StockMovementReversed {
        movement_id: i64,
        reversal_of: i64,
        product_id: Uuid,
        new_quantity: i32,
        actor_id: Option<Uuid>,
    },
    LowStockDetected {
        product_id: Uuid,
        quantity: i32,
        threshold: i32,
    },
    ActorDeleted {
        user_id: Uuid,
        audit_entries_detached: u64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes ledger events until the channel closes. Spawn this once at
/// startup alongside the services that share the sender half.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::StockMovementApplied {
                movement_id,
                product_id,
                ref movement_type,
                amount,
                new_quantity,
                ..
            } => {
                info!(
                    movement_id,
                    %product_id,
                    movement_type = %movement_type,
                    amount,
                    new_quantity,
                    "Stock movement applied"
                );
            }
            Event::StockMovementReversed {
                movement_id,
                reversal_of,
                product_id,
                new_quantity,
                ..
            } => {
                info!(
                    movement_id,
                    reversal_of,
                    %product_id,
                    new_quantity,
                    "Stock movement reversed"
                );
            }
            Event::LowStockDetected {
                product_id,
                quantity,
                threshold,
            } => {
                warn!(
                    %product_id,
                    quantity,
                    threshold,
                    "Product stock fell below threshold"
                );
            }
            Event::ActorDeleted {
                user_id,
                audit_entries_detached,
            } => {
                info!(
                    %user_id,
                    audit_entries_detached,
                    "Actor deleted; audit entries retained without attribution"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}
