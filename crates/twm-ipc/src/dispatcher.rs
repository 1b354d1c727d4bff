//! Event dispatch
//!
//! Routes each decoded [`Event`] to the handler registered for its name, or
//! to an optional default handler. Handlers run one at a time in arrival
//! order. A handler that fails or panics costs only the event it was
//! handling.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::debug;

use crate::error::{BoxError, HandlerError, HandlerFailure};
use crate::types::Event;

/// Consumer logic invoked for events
///
/// Implemented for any `FnMut(&Event) -> Result<(), BoxError>` closure, so
/// most callers never implement it by hand.
pub trait EventHandler: Send {
    /// Handle one event
    ///
    /// # Errors
    ///
    /// Any error is reported as a `HandlerError` for this event only.
    fn handle(&mut self, event: &Event) -> Result<(), BoxError>;
}

impl<F> EventHandler for F
where
    F: FnMut(&Event) -> Result<(), BoxError> + Send,
{
    fn handle(&mut self, event: &Event) -> Result<(), BoxError> {
        self(event)
    }
}

/// Which handler, if any, received an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The handler registered for the event's name
    Handler,
    /// The default handler
    Default,
    /// No handler applied; the event was dropped
    Ignored,
}

/// Name-keyed handler table
///
/// Built up front and then moved into a session, so the set of handlers is
/// fixed while events are flowing.
///
/// # Example
///
/// ```ignore
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.on("window_created", |event| {
///     println!("[NEW] {}", event.data.str_or("title", "Unknown"));
///     Ok(())
/// });
/// dispatcher.on_default(|event| {
///     println!("[{}]", event.name);
///     Ok(())
/// });
/// ```
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Box<dyn EventHandler>>,
    default: Option<Box<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `name`
    ///
    /// Replaces any handler previously registered for the same name.
    pub fn register(&mut self, name: impl Into<String>, handler: impl EventHandler + 'static) {
        let name = name.into();
        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            debug!("Replaced handler for {}", name);
        }
    }

    /// Register a closure for events named `name`
    pub fn on<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Event) -> Result<(), BoxError> + Send + 'static,
    {
        self.register(name, handler);
        self
    }

    /// Set the handler for events with no registered handler
    pub fn set_default(&mut self, handler: impl EventHandler + 'static) {
        self.default = Some(Box::new(handler));
    }

    /// Closure form of [`set_default`](Self::set_default)
    pub fn on_default<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Event) -> Result<(), BoxError> + Send + 'static,
    {
        self.set_default(handler);
        self
    }

    /// Whether an event named `name` would reach a handler
    pub fn handles(&self, name: &str) -> bool {
        self.default.is_some() || self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.handlers.is_empty()
    }

    /// Invoke the handler for `event`
    ///
    /// Exactly one handler runs: the one registered for the event's name if
    /// there is one, otherwise the default. The default never sees an event
    /// that has a specific handler.
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` if the handler returned an error or
    /// panicked. The dispatcher stays usable afterwards.
    pub fn dispatch(&mut self, event: &Event) -> Result<Dispatched, HandlerError> {
        let (handler, route) = match self.handlers.get_mut(&event.name) {
            Some(handler) => (handler, Dispatched::Handler),
            None => match self.default.as_mut() {
                Some(handler) => (handler, Dispatched::Default),
                None => {
                    debug!("No handler for {}, ignoring", event.name);
                    return Ok(Dispatched::Ignored);
                }
            },
        };

        debug!(event = %event.name, ?route, "Dispatching event");

        let failure = match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => return Ok(route),
            Ok(Err(e)) => HandlerFailure::Failed(e),
            Err(panic) => HandlerFailure::Panicked(panic_message(panic.as_ref())),
        };

        Err(HandlerError {
            event: event.name.clone(),
            source: failure,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher")
            .field("handlers", &names)
            .field("default", &self.default.is_some())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
