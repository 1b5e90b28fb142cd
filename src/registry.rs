//! Listener registry: a small typed event bus keyed by [`EventKind`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::event::{EventKind, RealtimeEvent};

/// A subscriber callback.
///
/// Listeners are compared by identity (`Arc::ptr_eq`), so keep the `Arc`
/// you registered if you intend to unsubscribe it later.
pub type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&RealtimeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered listener lists per event kind.
///
/// Registration order is invocation order. The same listener may be
/// registered more than once and is then invoked once per registration.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the list for `kind`.
    pub fn subscribe(&self, kind: EventKind, listener: Listener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.entry(kind).or_default().push(listener);
    }

    /// Remove the first registration of `listener` for `kind`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                list.remove(index);
                if list.is_empty() {
                    listeners.remove(&kind);
                }
                true
            }
            None => false,
        }
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// The lock is released before listeners run, so a listener may
    /// subscribe or unsubscribe; such changes apply from the next publish.
    /// Returns the number of listeners invoked.
    pub fn publish(&self, event: &RealtimeEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.get(&kind).cloned().unwrap_or_default()
        };
        trace!(event = %kind, listeners = snapshot.len(), "publishing");
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            let count = self.listener_count(kind);
            if count > 0 {
                map.entry(&kind.as_str(), &count);
            }
        }
        map.finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::{ConnectionStatus, ListenerCount, Metadata};
    use std::sync::Mutex as StdMutex;

    fn listeners_event() -> RealtimeEvent {
        RealtimeEvent::StreamListeners(ListenerCount {
            channel_id: "c1".into(),
            count: 3,
            extra: Metadata::new(),
        })
    }

    fn recorder(log: &Arc<StdMutex<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |_| log.lock().unwrap().push(tag))
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        registry.subscribe(EventKind::StreamListeners, recorder(&log, "first"));
        registry.subscribe(EventKind::StreamListeners, recorder(&log, "second"));

        for _ in 0..3 {
            registry.publish(&listeners_event());
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "second", "first", "second", "first", "second"]
        );
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        registry.subscribe(EventKind::Connection, recorder(&log, "connection"));

        assert_eq!(registry.publish(&listeners_event()), 0);
        assert!(log.lock().unwrap().is_empty());

        registry.publish(&RealtimeEvent::Connection(ConnectionStatus::connected()));
        assert_eq!(*log.lock().unwrap(), vec!["connection"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let cb = recorder(&log, "cb");
        registry.subscribe(EventKind::StreamListeners, Arc::clone(&cb));
        assert!(registry.unsubscribe(EventKind::StreamListeners, &cb));

        registry.publish(&listeners_event());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(registry.listener_count(EventKind::StreamListeners), 0);
    }

    #[test]
    fn duplicate_registration_fires_twice_and_unsubscribes_once() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let cb = recorder(&log, "cb");
        registry.subscribe(EventKind::StreamListeners, Arc::clone(&cb));
        registry.subscribe(EventKind::StreamListeners, Arc::clone(&cb));

        assert_eq!(registry.publish(&listeners_event()), 2);
        assert!(registry.unsubscribe(EventKind::StreamListeners, &cb));
        assert_eq!(registry.publish(&listeners_event()), 1);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn unsubscribing_unknown_listener_is_a_noop() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registered = recorder(&log, "registered");
        let stranger = recorder(&log, "stranger");
        registry.subscribe(EventKind::StreamListeners, Arc::clone(&registered));

        assert!(!registry.unsubscribe(EventKind::StreamListeners, &stranger));
        assert!(!registry.unsubscribe(EventKind::Connection, &registered));
        assert_eq!(registry.listener_count(EventKind::StreamListeners), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_while_running() {
        let registry = Arc::new(ListenerRegistry::new());
        let calls = Arc::new(StdMutex::new(0_u32));
        let slot: Arc<StdMutex<Option<Listener>>> = Arc::new(StdMutex::new(None));

        let cb = {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            listener(move |_| {
                *calls.lock().unwrap() += 1;
                if let Some(me) = slot.lock().unwrap().take() {
                    registry.unsubscribe(EventKind::StreamListeners, &me);
                }
            })
        };
        *slot.lock().unwrap() = Some(Arc::clone(&cb));
        registry.subscribe(EventKind::StreamListeners, cb);

        registry.publish(&listeners_event());
        registry.publish(&listeners_event());
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
