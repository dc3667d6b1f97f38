//! Best-effort push of lifecycle events to connected customers.
//!
//! One active channel per customer identity; re-registering replaces the old
//! channel. Nothing is queued, retried, or persisted: a customer who is not
//! connected simply misses the event. Events to the *same* customer arrive
//! in emission order; ordering across customers is unspecified.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::common::CustomerId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentSuccess,
    OrderStatus,
    OrderCancelled,
    InventoryAlert,
}

/// Flat push payload handed to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct NotificationHub {
    channels: RwLock<HashMap<CustomerId, mpsc::UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the customer's channel, replacing any previous one (the old
    /// receiver closes).
    pub async fn register(&self, customer_id: CustomerId) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.write().await;
        channels.insert(customer_id, tx);
        rx
    }

    pub async fn disconnect(&self, customer_id: CustomerId) {
        let mut channels = self.channels.write().await;
        channels.remove(&customer_id);
    }

    /// Deliver to one customer. Silently dropped when no channel is
    /// registered or the receiver is gone.
    pub async fn send(&self, customer_id: CustomerId, notification: Notification) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&customer_id) {
            // Ignore send errors (receiver dropped)
            let _ = tx.send(notification);
        }
    }

    /// Deliver to every registered channel, suppressing individual failures.
    pub async fn broadcast(&self, notification: Notification) -> usize {
        let channels = self.channels.read().await;
        let mut delivered = 0;
        for tx in channels.values() {
            if tx.send(notification.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn connected_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_preserves_order_per_customer() {
        let hub = NotificationHub::new();
        let customer = CustomerId::new();
        let mut rx = hub.register(customer).await;

        hub.send(customer, Notification::new(NotificationKind::PaymentSuccess, "paid"))
            .await;
        hub.send(customer, Notification::new(NotificationKind::OrderStatus, "grinding"))
            .await;

        assert_eq!(rx.recv().await.unwrap().message, "paid");
        assert_eq!(rx.recv().await.unwrap().message, "grinding");
    }

    #[tokio::test]
    async fn test_send_without_channel_is_dropped() {
        let hub = NotificationHub::new();
        // Should not panic or block
        hub.send(
            CustomerId::new(),
            Notification::new(NotificationKind::OrderStatus, "nobody listening"),
        )
        .await;
    }

    #[tokio::test]
    async fn test_reregister_replaces_channel() {
        let hub = NotificationHub::new();
        let customer = CustomerId::new();

        let mut old_rx = hub.register(customer).await;
        let mut new_rx = hub.register(customer).await;

        hub.send(customer, Notification::new(NotificationKind::OrderStatus, "hello"))
            .await;

        assert_eq!(new_rx.recv().await.unwrap().message, "hello");
        // Old channel's sender was dropped on replacement.
        assert!(old_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_suppresses_dead_channels() {
        let hub = NotificationHub::new();
        let alive = CustomerId::new();
        let gone = CustomerId::new();

        let mut rx = hub.register(alive).await;
        let dead_rx = hub.register(gone).await;
        drop(dead_rx);

        let delivered = hub
            .broadcast(Notification::new(NotificationKind::InventoryAlert, "low stock"))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().message, "low stock");
    }
}
