use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::order::OrderStatus;

// Domain events published after a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: i32,
        customer_id: i32,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled {
        order_id: i32,
        restored_units: i32,
    },
    SaleRecorded {
        order_id: i32,
        amount: Decimal,
        recorded_at: DateTime<Utc>,
    },
    CartSaved {
        user_id: i32,
        lines: usize,
    },
    ProductUpdated(i32),
    ProductDeleted {
        product_id: i32,
        soft: bool,
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

    /// Creates a sender together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when nobody is listening.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Publishes through an optional sender; services run fine without one.
pub(crate) async fn publish(sender: Option<&EventSender>, event: Event) {
    if let Some(sender) = sender {
        sender.send_or_log(event).await;
    }
}

/// Drains the event channel, logging each event until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                customer_id,
                total,
            } => info!(order_id, customer_id, %total, "order placed"),
            Event::OrderStatusChanged { order_id, from, to } => {
                info!(order_id, %from, %to, "order status changed")
            }
            Event::OrderCancelled {
                order_id,
                restored_units,
            } => info!(order_id, restored_units, "order cancelled"),
            Event::SaleRecorded {
                order_id, amount, ..
            } => info!(order_id, %amount, "sale recorded"),
            other => info!(event = ?other, "event received"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        sender.send_or_log(Event::ProductUpdated(1)).await;
        assert!(sender.send(Event::ProductUpdated(1)).await.is_err());
    }

    #[tokio::test]
    async fn publish_without_sender_is_a_no_op() {
        publish(None, Event::CartSaved { user_id: 1, lines: 0 }).await;

        let (sender, mut rx) = EventSender::channel(1);
        publish(Some(&sender), Event::CartSaved { user_id: 1, lines: 2 }).await;
        assert_eq!(rx.recv().await, Some(Event::CartSaved { user_id: 1, lines: 2 }));
    }
}
