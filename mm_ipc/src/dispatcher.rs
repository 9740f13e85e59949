use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use parking_lot::RwLock;
use rapidhash::RapidHashMap;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::message::Message;

/// Callback invoked with the `data` of every message carrying its op
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Routes decoded messages to the collaborators subscribed to their op.
///
/// Handlers for one op run in registration order. A failing or panicking
/// handler is logged and does not stop the others.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<RapidHashMap<String, Vec<Handler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for the given op
    pub fn register<F>(&self, op: &str, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().entry(op.to_string()).or_default().push(Arc::new(handler));
    }

    /// Returns a channel receiving the payload of every message with the given op
    pub fn subscribe(&self, op: &str) -> Receiver<Value> {
        let (tx, rx) = unbounded();
        let op_name = op.to_string();
        self.register(op, move |data| {
            if tx.send(data.clone()).is_err() {
                debug!("Subscriber channel for '{op_name}' closed");
            }
            Ok(())
        });
        rx
    }

    pub fn has_subscribers(&self, op: &str) -> bool {
        self.handlers.read().get(op).is_some_and(|handlers| !handlers.is_empty())
    }

    /// Delivers a message to its handlers and returns how many ran
    pub fn dispatch(&self, message: &Message) -> usize {
        // Clone the list so handlers may register further handlers
        let handlers = match self.handlers.read().get(&message.op) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        for handler in &handlers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&message.data))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Handler for '{}' failed: {err:#}", message.op),
                Err(_) => error!("Handler for '{}' panicked", message.op),
            }
        }

        handlers.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut ops: Vec<&str> = handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        f.debug_struct("EventDispatcher").field("ops", &ops).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    fn msg(op: &str, data: Value) -> Message {
        Message::new(op, data).unwrap()
    }

    #[test]
    fn test_dispatch_to_registered_handlers_in_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.register("trade", move |data| {
                seen.lock().push(format!("{tag}:{data}"));
                Ok(())
            });
        }

        assert_eq!(dispatcher.dispatch(&msg("trade", json!(1))), 2);
        assert_eq!(*seen.lock(), vec!["first:1".to_string(), "second:1".to_string()]);
    }

    #[test]
    fn test_unsubscribed_op_is_not_an_error() {
        let dispatcher = EventDispatcher::new();
        assert!(!dispatcher.has_subscribers("book"));
        assert_eq!(dispatcher.dispatch(&msg("book", json!({}))), 0);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_dispatch() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register("tick", |_| anyhow::bail!("storage unavailable"));
        dispatcher.register("tick", |_| panic!("handler bug"));
        let counter = Arc::clone(&calls);
        dispatcher.register("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(dispatcher.dispatch(&msg("tick", json!(null))), 3);
        assert_eq!(dispatcher.dispatch(&msg("tick", json!(null))), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribe_channel_preserves_order() {
        let dispatcher = EventDispatcher::new();
        let rx = dispatcher.subscribe("candle");

        for i in 0..5 {
            dispatcher.dispatch(&msg("candle", json!(i)));
        }
        dispatcher.dispatch(&msg("other", json!("ignored")));

        let received: Vec<Value> = rx.try_iter().collect();
        assert_eq!(received, (0..5).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[test]
    fn test_dropped_subscriber_is_harmless() {
        let dispatcher = EventDispatcher::new();
        drop(dispatcher.subscribe("candle"));
        assert_eq!(dispatcher.dispatch(&msg("candle", json!(1))), 1);
    }
}
