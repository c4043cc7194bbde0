//! Publish/subscribe registry keyed by [`EventKind`].
//!
//! Delivery is synchronous and in registration order. Each callback runs
//! isolated: a panicking subscriber is logged and the rest still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::event::{Event, EventKind};

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    registry: Mutex<HashMap<EventKind, Vec<Handler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Handler>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler for `kind`. Registering the same handler twice
    /// delivers twice.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.registry().entry(kind).or_default().push(handler);
    }

    /// Remove the first registration of `handler` for `kind`. Returns
    /// false if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler) -> bool {
        let mut registry = self.registry();
        let Some(handlers) = registry.get_mut(&kind) else {
            return false;
        };
        match handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                if handlers.is_empty() {
                    registry.remove(&kind);
                }
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every current subscriber of its kind. Returns the
    /// number of callbacks that completed without panicking.
    pub fn publish(&self, event: &Event) -> usize {
        let kind = event.kind();
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = match self.registry().get(&kind) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    crate::log_error!("Error in '{}' event listener: {}", kind, detail);
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.registry().clear();
    }
}

/// Handle returned by `on`; removes its registration when asked.
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    kind: EventKind,
    handler: Handler,
    dispatcher: Weak<Dispatcher>,
}

impl Subscription {
    pub(crate) fn new(kind: EventKind, handler: Handler, dispatcher: &Arc<Dispatcher>) -> Self {
        Self {
            kind,
            handler,
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Remove the registration. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.unsubscribe(self.kind, &self.handler),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn recorder(log: &Arc<Mutex<Vec<usize>>>, id: usize) -> Handler {
        let log = log.clone();
        Arc::new(move |_event: &Event| log.lock().unwrap().push(id))
    }

    #[test]
    fn delivers_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            dispatcher.subscribe(EventKind::Connected, recorder(&log, id));
        }
        assert_eq!(dispatcher.publish(&Event::Connected), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_rest() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe(EventKind::Connected, Arc::new(|_: &Event| panic!("boom")));
        dispatcher.subscribe(EventKind::Connected, recorder(&log, 1));
        assert_eq!(dispatcher.publish(&Event::Connected), 1);
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn unsubscribe_removes_first_match_only() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, 7);
        dispatcher.subscribe(EventKind::Connected, handler.clone());
        dispatcher.subscribe(EventKind::Connected, handler.clone());

        assert!(dispatcher.unsubscribe(EventKind::Connected, &handler));
        dispatcher.publish(&Event::Connected);
        assert_eq!(*log.lock().unwrap(), vec![7]);

        assert!(dispatcher.unsubscribe(EventKind::Connected, &handler));
        assert!(!dispatcher.unsubscribe(EventKind::Connected, &handler));
        assert_eq!(dispatcher.subscriber_count(EventKind::Connected), 0);
    }

    #[test]
    fn events_without_subscribers_are_discarded() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.publish(&Event::Connected), 0);
    }

    #[test]
    fn subscription_handle_unsubscribes() {
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, 1);
        dispatcher.subscribe(EventKind::Error, handler.clone());
        let sub = Subscription::new(EventKind::Error, handler, &dispatcher);

        assert!(sub.unsubscribe());
        dispatcher.publish(&Event::Error {
            message: "x".into(),
        });
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn callbacks_may_subscribe_during_publish() {
        let dispatcher = Arc::new(Dispatcher::new());
        let inner = dispatcher.clone();
        dispatcher.subscribe(
            EventKind::Connected,
            Arc::new(move |_: &Event| {
                inner.subscribe(EventKind::Connected, Arc::new(|_: &Event| {}));
            }),
        );
        assert_eq!(dispatcher.publish(&Event::Connected), 1);
        assert_eq!(dispatcher.subscriber_count(EventKind::Connected), 2);
    }

    proptest! {
        /// Property: delivery order equals registration order, with panicking
        /// subscribers skipped but never blocking later ones
        #[test]
        fn prop_order_and_isolation(panics in proptest::collection::vec(any::<bool>(), 1..12)) {
            let dispatcher = Dispatcher::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            for (id, should_panic) in panics.iter().enumerate() {
                if *should_panic {
                    dispatcher.subscribe(EventKind::Message, Arc::new(|_: &Event| panic!("subscriber failure")));
                } else {
                    dispatcher.subscribe(EventKind::Message, recorder(&log, id));
                }
            }
            let event = Event::RoomDeleted(chatwire_shared::RoomRemoved { room_id: 1.into() });
            // Different kind: nobody hears it
            prop_assert_eq!(dispatcher.publish(&event), 0);

            let message = Event::Message(chatwire_shared::ChatMessage {
                id: None,
                room_id: "r".into(),
                text: "hi".into(),
                sender: None,
                timestamp: None,
                message_type: None,
                extra: Default::default(),
            });
            let delivered = dispatcher.publish(&message);
            let expected: Vec<usize> = panics
                .iter()
                .enumerate()
                .filter(|(_, p)| !**p)
                .map(|(id, _)| id)
                .collect();
            prop_assert_eq!(delivered, expected.len());
            prop_assert_eq!(log.lock().unwrap().clone(), expected);
        }
    }
}
