//! Rotation notifications.
//!
//! Async consumers subscribe to a broadcast channel; synchronous consumers register a
//! callback. Both receive every [`KeyEvent`] the engine publishes.

use crate::types::KeyPurpose;
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum KeyEvent {
    /// Published as `key-rotation`.
    #[serde(rename = "key-rotation")]
    Rotated { timestamp: DateTime<Utc>, purposes: Vec<KeyPurpose> },
    /// Published as `key-rotation-error`. `rotated` lists purposes that did switch keys
    /// before the failure; the rest keep their previous keys.
    #[serde(rename = "key-rotation-error")]
    RotationFailed { timestamp: DateTime<Utc>, error: String, rotated: Vec<KeyPurpose> },
}

impl KeyEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Rotated { .. } => "key-rotation",
            Self::RotationFailed { .. } => "key-rotation-error",
        }
    }
}

/// Identifies a callback registered with [`Notifier::on_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&KeyEvent) + Send + Sync>;

/// Observer registry for [`KeyEvent`]s.
pub struct Notifier {
    sender: RwLock<Option<broadcast::Sender<Arc<KeyEvent>>>>,
    callbacks: RwLock<FxHashMap<SubscriptionId, Callback>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("receivers", &self.receiver_count())
            .field("callbacks", &self.callbacks.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            sender: RwLock::new(Some(sender)),
            callbacks: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to future events. After [`Notifier::close`] the receiver ends immediately.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KeyEvent>> {
        let mut sender = self.sender.write();
        sender.get_or_insert_with(|| broadcast::channel(DEFAULT_CAPACITY).0).subscribe()
    }

    /// Registers `callback`, invoked synchronously on the publishing task.
    pub fn on_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&KeyEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(id, Arc::new(callback));
        id
    }

    /// Removes a callback. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    /// Delivers `event` to every subscriber and callback. Returns the number reached.
    pub fn publish(&self, event: KeyEvent) -> usize {
        let event = Arc::new(event);

        let delivered = self
            .sender
            .read()
            .as_ref()
            .and_then(|sender| sender.send(Arc::clone(&event)).ok())
            .unwrap_or(0);
        if delivered == 0 {
            trace!(event = event.name(), "Event dropped: no active subscribers");
        }

        // Snapshot so a callback may (un)register without deadlocking.
        let callbacks: Vec<Callback> = self.callbacks.read().values().cloned().collect();
        for callback in &callbacks {
            callback(&event);
        }

        debug!(event = event.name(), receivers = delivered, callbacks = callbacks.len(), "Event published");
        delivered + callbacks.len()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.read().as_ref().map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drops all callbacks and ends every open subscription.
    pub fn close(&self) {
        self.sender.write().take();
        self.callbacks.write().clear();
    }
}

/// Lag-tolerant receive for event subscriptions.
pub trait KeyEventReceiverExt {
    /// Next event, or `None` once the notifier is closed. Skips over lagged events.
    fn next_event(&mut self) -> impl Future<Output = Option<Arc<KeyEvent>>> + Send;
}

impl KeyEventReceiverExt for broadcast::Receiver<Arc<KeyEvent>> {
    async fn next_event(&mut self) -> Option<Arc<KeyEvent>> {
        let mut skipped = 0u64;
        loop {
            match self.recv().await {
                Ok(event) => {
                    if skipped > 0 {
                        warn!(skipped, "Key event receiver lagged; continuing from latest event");
                    }
                    return Some(event);
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    skipped = skipped.saturating_add(n);
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn rotated() -> KeyEvent {
        KeyEvent::Rotated { timestamp: Utc::now(), purposes: KeyPurpose::ALL.to_vec() }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        assert_eq!(notifier.publish(rotated()), 1);

        let event = rx.next_event().await.unwrap();
        assert_eq!(event.name(), "key-rotation");
    }

    #[test]
    fn callbacks_run_until_unsubscribed() {
        let notifier = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = notifier.on_event(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.publish(rotated());
        assert!(notifier.unsubscribe(id));
        notifier.publish(rotated());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!notifier.unsubscribe(id));
    }

    #[test]
    fn publishing_without_listeners_is_fine() {
        assert_eq!(Notifier::new().publish(rotated()), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.close();

        assert!(rx.next_event().await.is_none());
        assert_eq!(notifier.receiver_count(), 0);
    }

    #[tokio::test]
    async fn lagged_receiver_recovers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        for _ in 0..(DEFAULT_CAPACITY + 10) {
            notifier.publish(rotated());
        }
        notifier.publish(KeyEvent::RotationFailed {
            timestamp: Utc::now(),
            error: "boom".to_owned(),
            rotated: vec![],
        });

        let mut last = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), rx.next_event()).await
        {
            last = Some(event);
        }
        assert_eq!(last.unwrap().name(), "key-rotation-error");
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let json = serde_json::to_value(rotated()).unwrap();
        assert_eq!(json["event"], "key-rotation");
        assert_eq!(json["purposes"][0], "application");
    }
}
