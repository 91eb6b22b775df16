// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed publish/subscribe fan-out.
//!
//! [`EventBus`] is a thin layer over `tokio::sync::broadcast`: `subscribe`
//! is `on` (dropping the receiver is `off`), [`EventBus::once`] waits for a
//! single matching event, and [`EventBus::emit`] publishes to everyone.
//! Crossing the leak threshold with live subscribers logs a warning.

use tokio::sync::broadcast;
use tracing::warn;

/// Subscriber count past which [`EventBus::subscribe`] warns.
pub const DEFAULT_LEAK_THRESHOLD: usize = 10;

/// Channel depth for subscribers; slow consumers past this lag and skip.
const DEFAULT_CAPACITY: usize = 64;

/// Typed broadcast bus.
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
    leak_threshold: usize,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            leak_threshold: DEFAULT_LEAK_THRESHOLD,
        }
    }

    pub fn with_leak_threshold(mut self, threshold: usize) -> Self {
        self.leak_threshold = threshold;
        self
    }

    /// Add a listener. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        let count = self.tx.receiver_count() + 1;
        if count > self.leak_threshold {
            warn!(
                listeners = count,
                threshold = self.leak_threshold,
                "possible event listener leak"
            );
        }
        self.tx.subscribe()
    }

    /// Publish to all current listeners; returns how many received it.
    pub fn emit(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait for the next event matching `pred`. `None` when the bus is
    /// dropped before a match arrives. Lagged events are skipped.
    pub async fn once<F: FnMut(&T) -> bool>(&self, mut pred: F) -> Option<T> {
        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            leak_threshold: self.leak_threshold,
        }
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .field("leak_threshold", &self.leak_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.emit(5), 2);
        assert_eq!(a.recv().await.unwrap(), 5);
        assert_eq!(b.recv().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.emit(1), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_once_matches_predicate() {
        let bus: EventBus<u32> = EventBus::new();
        let bus2 = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            bus2.emit(3);
            bus2.emit(11);
        });
        assert_eq!(bus.once(|v| *v > 10).await, Some(11));
    }
}
