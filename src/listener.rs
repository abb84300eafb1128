//! Listener registry and fan-out.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

use crate::types::{ListenerId, TradeMessage};

/// Callback invoked with every accepted trade message.
pub type Listener = Arc<dyn Fn(&TradeMessage) + Send + Sync>;

/// Unordered set of registered listeners.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: DashMap<ListenerId, Listener>,
}

impl Listeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `listener` and returns the handle that removes it.
    pub fn register<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&TradeMessage) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(self),
        }
    }

    /// Registers a bounded channel as a listener.
    ///
    /// Messages that do not fit into the channel are dropped with a warning,
    /// a slow consumer never stalls delivery to the others.
    pub fn register_channel(self: &Arc<Self>, size: usize) -> TradeReceiver {
        let (tx, rx) = mpsc::channel(size.max(1));
        let subscription = self.register(move |message| match tx.try_send(message.clone()) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(message)) => {
                warn!(key = %message.key(), "trade channel full, dropping message");
            }
        });
        TradeReceiver {
            inner: rx,
            subscription,
        }
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Invokes every listener with `message`, returning how many panicked.
    ///
    /// Listeners run outside of the registry lock, so they may subscribe or
    /// unsubscribe from within the callback. A panicking listener is logged
    /// and skipped, the remaining ones still receive the message.
    pub fn dispatch(&self, message: &TradeMessage) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut failed = 0;
        for (id, listener) in snapshot {
            // Removed by an earlier listener of this same dispatch.
            if !self.entries.contains_key(&id) {
                continue;
            }
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(message))) {
                failed += 1;
                error!(
                    listener = id,
                    key = %message.key(),
                    reason = panic_reason(panic.as_ref()),
                    "trade listener panicked"
                );
            }
        }
        failed
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes exactly this listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.id))
    }

    pub fn is_active(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.entries.contains_key(&self.id))
    }
}

/// Receiver side of a channel subscription.
///
/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct TradeReceiver {
    inner: mpsc::Receiver<TradeMessage>,
    subscription: Subscription,
}

impl TradeReceiver {
    /// Receives the next trade, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<TradeMessage> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TradeMessage> {
        self.inner.try_recv().ok()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for TradeReceiver {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use serde_json::json;

    use super::*;

    fn trade(id: &str) -> TradeMessage {
        TradeMessage::from_candidate(json!({"id": id})).unwrap()
    }

    fn counter(listeners: &Arc<Listeners>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let sub = listeners.register({
            let count = count.clone();
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        (count, sub)
    }

    #[test]
    fn test_every_listener_receives_message() {
        let listeners = Listeners::new();
        let (a, _sa) = counter(&listeners);
        let (b, _sb) = counter(&listeners);

        assert_eq!(listeners.dispatch(&trade("1")), 0);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let listeners = Listeners::new();
        let (a, sa) = counter(&listeners);
        let (b, sb) = counter(&listeners);

        listeners.dispatch(&trade("1"));
        assert!(sa.unsubscribe());
        assert!(!sa.unsubscribe());
        assert!(!sa.is_active());
        assert!(sb.is_active());
        listeners.dispatch(&trade("2"));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_dropping_subscription_keeps_listener() {
        let listeners = Listeners::new();
        let (a, sa) = counter(&listeners);
        drop(sa);
        listeners.dispatch(&trade("1"));
        assert_eq!(a.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::new();
        let _bad = listeners.register(|_| panic!("listener bug"));
        let (good, _sg) = counter(&listeners);

        assert_eq!(listeners.dispatch(&trade("1")), 1);
        assert_eq!(listeners.dispatch(&trade("2")), 1);
        assert_eq!(good.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let listeners = Listeners::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = listeners.register({
            let (slot, calls) = (slot.clone(), calls.clone());
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().unwrap().as_ref() {
                    sub.unsubscribe();
                }
            }
        });
        *slot.lock().unwrap() = Some(sub);

        listeners.dispatch(&trade("1"));
        listeners.dispatch(&trade("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_subscription() {
        let listeners = Listeners::new();
        let mut rx = listeners.register_channel(1);
        listeners.dispatch(&trade("1"));
        // Full: dropped, not blocking.
        listeners.dispatch(&trade("2"));

        assert_eq!(rx.try_recv().map(|m| m.id().map(str::to_string)), Some(Some("1".into())));
        assert!(rx.try_recv().is_none());

        drop(rx);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let listeners = Listeners::new();
        let (_, sub) = counter(&listeners);
        drop(listeners);
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
    }
}
