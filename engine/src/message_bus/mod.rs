//! Message Bus for execution events
//!
//! Per-session pub/sub: transports subscribe to a session and receive the
//! ordered [`ExecutionEvent`]s the dispatcher publishes for it. Channels are
//! bounded; a subscriber that falls behind loses events instead of stalling
//! dispatch.

use sdk::events::ExecutionEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Message bus keyed by session identifier
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<ExecutionEvent>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to the events of one session
    ///
    /// Subscribers whose receiver was dropped are swept from every session first.
    pub async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ExecutionEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        Self::sweep(&mut channels);
        channels.entry(session_id.to_string()).or_default().push(tx);
        rx
    }

    /// Drop closed subscribers and the sessions left without any
    fn sweep(channels: &mut HashMap<String, Vec<mpsc::Sender<ExecutionEvent>>>) {
        channels.retain(|_, subscribers| {
            subscribers.retain(|tx| !tx.is_closed());
            !subscribers.is_empty()
        });
    }

    /// Publish an event to every subscriber of the session
    ///
    /// Closed subscribers are dropped. Full subscribers skip this event.
    pub async fn publish(&self, session_id: &str, event: ExecutionEvent) {
        let mut channels = self.channels.lock().await;
        let Some(subscribers) = channels.get_mut(session_id) else {
            return;
        };

        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber of session {} is full, dropping {} event",
                    session_id,
                    event.name()
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            channels.remove(session_id);
        }
    }

    /// Drop every subscriber of a session, ending their streams
    pub async fn close(&self, session_id: &str) {
        self.channels.lock().await.remove(session_id);
    }

    /// Number of live subscribers for a session
    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(session_id)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::SessionStatus;

    fn started(total: usize) -> ExecutionEvent {
        ExecutionEvent::ExecutionStarted {
            total_steps: total,
            cursor: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("s1").await;

        bus.publish("s1", started(3)).await;

        assert_eq!(rx.recv().await.unwrap(), started(3));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let bus = MessageBus::new();
        let mut rx1 = bus.subscribe("s1").await;
        let mut rx2 = bus.subscribe("s2").await;

        bus.publish("s1", started(1)).await;
        bus.publish(
            "s2",
            ExecutionEvent::ExecutionCompleted {
                status: SessionStatus::Completed,
            },
        )
        .await;

        assert_eq!(rx1.recv().await.unwrap(), started(1));
        assert!(rx1.try_recv().is_err());
        assert!(matches!(
            rx2.recv().await.unwrap(),
            ExecutionEvent::ExecutionCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_keep_order() {
        let bus = MessageBus::new();
        let mut rx1 = bus.subscribe("s1").await;
        let mut rx2 = bus.subscribe("s1").await;

        for n in 0..3 {
            bus.publish("s1", started(n)).await;
        }

        for rx in [&mut rx1, &mut rx2] {
            for n in 0..3 {
                assert_eq!(rx.recv().await.unwrap(), started(n));
            }
        }
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_without_blocking() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("s1").await;

        for n in 0..CHANNEL_BUFFER_SIZE + 10 {
            bus.publish("s1", started(n)).await;
        }

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_BUFFER_SIZE);
        assert_eq!(bus.subscriber_count("s1").await, 1);
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let bus = MessageBus::new();
        let rx = bus.subscribe("s1").await;
        drop(rx);

        bus.publish("s1", started(1)).await;
        assert_eq!(bus.subscriber_count("s1").await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_sessions_swept_without_publish() {
        let bus = MessageBus::new();
        for n in 0..50 {
            drop(bus.subscribe(&format!("gone-{}", n)).await);
        }
        // Only the last abandoned entry is left to sweep
        assert_eq!(bus.channels.lock().await.len(), 1);
        assert_eq!(bus.subscriber_count("gone-49").await, 0);

        let _live = bus.subscribe("live").await;

        assert_eq!(bus.subscriber_count("live").await, 1);
        let channels = bus.channels.lock().await;
        assert_eq!(channels.len(), 1);
        assert!(channels.contains_key("live"));
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("s1").await;
        bus.close("s1").await;
        assert!(rx.recv().await.is_none());
    }
}
