//! Ordered registry of live-event subscribers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{EventTag, ServerMessage};

/// Subscriber callback. Returning an error (or panicking) only affects the
/// callback itself.
pub type EventListener = Arc<dyn Fn(&ServerMessage) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscriber that failed while being notified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerFailure {
    pub subscription: SubscriptionId,
    pub tag: EventTag,
    pub seq: u64,
    pub reason: String,
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, EventListener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ServerMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_shared(Arc::new(callback))
    }

    pub fn subscribe_shared(&self, listener: EventListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    /// Removes the subscription. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invokes every current subscriber once, in subscription order.
    ///
    /// The subscriber list is copied before the first call, so callbacks may
    /// subscribe or unsubscribe (themselves included) without the lock held;
    /// such changes take effect from the next event.
    pub fn notify(&self, message: &ServerMessage) -> Vec<ListenerFailure> {
        let snapshot: Vec<(SubscriptionId, EventListener)> = self.entries.read().clone();
        let mut failures = Vec::new();
        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(message)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => panic_reason(payload.as_ref()),
            };
            failures.push(ListenerFailure {
                subscription: id,
                tag: message.tag(),
                seq: message.seq,
                reason,
            });
        }
        failures
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("listener panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("listener panicked: {message}")
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use parking_lot::Mutex;

    fn greeting(seq: u64) -> ServerMessage {
        ServerMessage::decode(&format!(
            r#"{{"tag":"Greetings","seq":{seq},"timestamp":"2024-03-01T10:00:00Z","me":{{"vkey":"alice"}}}}"#
        ))
        .expect("decode greeting")
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> EventListener {
        let log = Arc::clone(log);
        Arc::new(move |message: &ServerMessage| {
            log.lock().push(format!("{name}:{}", message.seq));
            Ok(())
        })
    }

    #[test]
    fn notifies_in_subscription_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe_shared(recorder(&log, "first"));
        registry.subscribe_shared(recorder(&log, "second"));

        assert!(registry.notify(&greeting(1)).is_empty());
        assert!(registry.notify(&greeting(2)).is_empty());

        assert_eq!(
            *log.lock(),
            vec!["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.subscribe_shared(recorder(&log, "only"));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());

        registry.notify(&greeting(1));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failures_are_isolated() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = registry.subscribe(|_| bail!("subscriber offline"));
        let panicking = registry.subscribe(|_| panic!("boom"));
        registry.subscribe_shared(recorder(&log, "healthy"));

        let failures = registry.notify(&greeting(5));

        assert_eq!(*log.lock(), vec!["healthy:5"]);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].subscription, failing);
        assert_eq!(failures[0].reason, "subscriber offline");
        assert_eq!(failures[1].subscription, panicking);
        assert_eq!(failures[1].reason, "listener panicked: boom");
        assert_eq!(failures[1].tag, EventTag::Greetings);
    }

    #[test]
    fn self_unsubscribe_takes_effect_next_event() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let id = {
            let handle = Arc::clone(&registry);
            let own_id = Arc::clone(&own_id);
            let log = Arc::clone(&log);
            registry.subscribe(move |message| {
                log.lock().push(format!("once:{}", message.seq));
                if let Some(id) = *own_id.lock() {
                    handle.unsubscribe(id);
                }
                Ok(())
            })
        };
        *own_id.lock() = Some(id);
        registry.subscribe_shared(recorder(&log, "after"));

        registry.notify(&greeting(1));
        registry.notify(&greeting(2));

        assert_eq!(*log.lock(), vec!["once:1", "after:1", "after:2"]);
    }
}
