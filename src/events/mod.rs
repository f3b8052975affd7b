use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

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

    /// Sends an event, logging instead of failing when the bus is closed
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events raised by checkout and settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        payment_intent_id: String,
        total: Decimal,
    },
    OrderCompleted(Uuid),
    OrderCancelled(Uuid),
    StockAdjusted {
        order_id: Uuid,
        product_id: Uuid,
        old_stock: i32,
        new_stock: i32,
    },
    /// A payment outcome that could not be fully applied; needs manual follow-up
    ReconciliationGap {
        payment_intent_id: String,
        reason: String,
    },
}

/// Drains the event channel and logs each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                payment_intent_id,
                total,
            } => info!(%order_id, %payment_intent_id, %total, "order created"),
            Event::OrderCompleted(order_id) => info!(%order_id, "order completed"),
            Event::OrderCancelled(order_id) => info!(%order_id, "order cancelled"),
            Event::StockAdjusted {
                order_id,
                product_id,
                old_stock,
                new_stock,
            } => debug!(%order_id, %product_id, old_stock, new_stock, "stock adjusted"),
            Event::ReconciliationGap {
                payment_intent_id,
                reason,
            } => warn!(%payment_intent_id, %reason, "reconciliation gap"),
        }
    }

    info!("Event processing loop stopped");
}
