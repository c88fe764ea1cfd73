//! Process-local fan-out by signal name.
//!
//! Unlike a message-bus abstraction, [`SignalBus::send`] invokes every
//! matching handler synchronously on the caller's stack — required because
//! the ORM hooks run inside the database transaction boundary and their side
//! effects must complete before control returns to the ORM.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::SignalPayload;

/// Stable identity used to route sender-bound signals.
///
/// If the sender exposes a `name` attribute in its metadata, that name is
/// used; otherwise the sender's identity value is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKey(pub String);

impl fmt::Display for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscribed handler. Handlers are always strong references — weak
/// references would drop the closures the ORM hooks capture over
/// short-lived locals.
pub type Handler = Arc<dyn Fn(&SignalPayload) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error("signal handler failed: {0}")]
pub struct HandlerError(pub String);

struct Subscription {
    sender: Option<SenderKey>,
    handler: Handler,
}

/// In-process fan-out: signal name -> ordered list of handlers.
///
/// No ordering guarantee between different signal names; for one signal
/// name, handlers fire in registration order.
#[derive(Default)]
pub struct SignalBus {
    subscriptions: RwLock<std::collections::HashMap<String, Vec<Subscription>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `signal`, firing on every send regardless of
    /// sender.
    pub fn connect(&self, signal: &str, handler: Handler) {
        self.connect_inner(signal, None, handler);
    }

    /// Subscribe `handler` to `signal`, firing only when the sender of a
    /// `send` matches `sender`.
    pub fn connect_for_sender(&self, signal: &str, sender: SenderKey, handler: Handler) {
        self.connect_inner(signal, Some(sender), handler);
    }

    fn connect_inner(&self, signal: &str, sender: Option<SenderKey>, handler: Handler) {
        self.subscriptions
            .write()
            .entry(signal.to_string())
            .or_default()
            .push(Subscription { sender, handler });
    }

    /// Remove every handler registered for `signal`. Used for test teardown
    /// and for disconnecting an ORM publisher instance.
    pub fn disconnect_all(&self, signal: &str) {
        self.subscriptions.write().remove(signal);
    }

    /// Invoke every handler registered for `signal`, in registration order.
    /// Handlers with a sender filter fire only when `sender` matches;
    /// unfiltered handlers always fire. Handler errors are collected and
    /// returned rather than aborting the remaining handlers, since a
    /// misbehaving subscriber must not prevent its siblings from observing
    /// the signal.
    pub fn send(
        &self,
        signal: &str,
        sender: Option<&SenderKey>,
        payload: &SignalPayload,
    ) -> Vec<HandlerError> {
        let handlers: Vec<Handler> = {
            let subs = self.subscriptions.read();
            match subs.get(signal) {
                None => return Vec::new(),
                Some(list) => list
                    .iter()
                    .filter(|s| match &s.sender {
                        None => true,
                        Some(filter) => Some(filter) == sender,
                    })
                    .map(|s| Arc::clone(&s.handler))
                    .collect(),
            }
        };

        let mut errors = Vec::new();
        for handler in handlers {
            if let Err(e) = handler(payload) {
                tracing::warn!(signal, error = %e, "signal handler returned error");
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PrimaryKey, SignalPayload, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = SignalBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.connect(
                "test_write",
                Arc::new(move |_| {
                    order.lock().push(i);
                    Ok(())
                }),
            );
        }

        bus.send(
            "test_write",
            None,
            &SignalPayload::Pk(PrimaryKey::Single(Value::Int(1))),
        );
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn sender_filter_only_fires_for_matching_sender() {
        let bus = SignalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        bus.connect_for_sender(
            "session_prepare",
            SenderKey("factory-a".into()),
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let payload = SignalPayload::TransactionPrepare {
            tid: "t1".into(),
            event_set: Default::default(),
        };

        bus.send("session_prepare", Some(&SenderKey("factory-b".into())), &payload);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.send("session_prepare", Some(&SenderKey("factory-a".into())), &payload);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unfiltered_handler_fires_regardless_of_sender() {
        let bus = SignalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        bus.connect(
            "session_commit",
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        bus.send(
            "session_commit",
            Some(&SenderKey("whoever".into())),
            &SignalPayload::TransactionCommit { tid: "t1".into() },
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
