//! The typed event dispatcher.
//!
//! One dispatcher per session routes every inbound [`ServerEvent`] to
//! the handlers registered for its kind, in registration order.
//! Unrelated features can register independent handlers for the same
//! kind; a failing handler is logged and the rest still run; events
//! for kinds with no registered handler are dropped silently. Handlers
//! registered by a feature are removed on its teardown, so a late
//! event for a torn-down feature is a safe no-op.

use std::collections::HashMap;

use tracing::{error, trace};

use murmur_shared::{EventKind, ServerEvent};

/// Handle for one registration; keep it to unregister on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// Sync so a task owning the dispatcher can be borrowed across awaits.
type Handler = Box<dyn FnMut(&ServerEvent) -> anyhow::Result<()> + Send + Sync>;

/// Maps event kinds to ordered handler lists.
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register `handler` for `kind`. Handlers for one kind run in
    /// registration order.
    pub fn register(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove one registration. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: HandlerId) {
        for list in self.handlers.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Fan the event out to every handler registered for its kind.
    ///
    /// Handler failures are isolated: each is logged and the remaining
    /// handlers still run. Returns how many handlers were invoked.
    pub fn dispatch(&mut self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let Some(list) = self.handlers.get_mut(&kind) else {
            trace!(kind = ?kind, "No handlers registered, dropping event");
            return 0;
        };
        let mut invoked = 0;
        for (id, handler) in list.iter_mut() {
            invoked += 1;
            if let Err(e) = handler(event) {
                error!(kind = ?kind, handler = ?id, error = %e, "Event handler failed");
            }
        }
        invoked
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn log_handler(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str)
        -> impl FnMut(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(tag);
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(EventKind::Connected, log_handler(&log, "chat"));
        dispatcher.register(EventKind::Connected, log_handler(&log, "notifications"));

        let invoked = dispatcher.dispatch(&ServerEvent::Connected);
        assert_eq!(invoked, 2);
        assert_eq!(&*log.lock().unwrap(), &["chat", "notifications"]);
    }

    #[test]
    fn failing_handler_does_not_block_the_rest() {
        let mut dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(EventKind::Connected, |_| anyhow::bail!("boom"));
        dispatcher.register(EventKind::Connected, log_handler(&log, "survivor"));

        let invoked = dispatcher.dispatch(&ServerEvent::Connected);
        assert_eq!(invoked, 2);
        assert_eq!(&*log.lock().unwrap(), &["survivor"]);
    }

    #[test]
    fn unregistered_handler_no_longer_runs() {
        let mut dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = dispatcher.register(EventKind::Disconnected, log_handler(&log, "gone"));
        dispatcher.unregister(id);

        dispatcher.dispatch(&ServerEvent::Disconnected);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.handler_count(EventKind::Disconnected), 0);
    }

    #[test]
    fn event_with_no_handlers_is_dropped() {
        let mut dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.dispatch(&ServerEvent::Reconnected), 0);
    }

    #[test]
    fn dispatcher_is_send_and_sync() {
        // A session task owning a dispatcher must stay spawnable even
        // while it is borrowed across await points.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventDispatcher>();
    }
}
