//! Receiver - the worker-side end of an emitter/receiver pair.
//!
//! Handlers are registered by name and get mutable access to the state the
//! dispatch loop owns (`S`). A handler's `Ok` value or error is sent back
//! only for synchronous calls; for fire-and-forget calls errors are logged
//! and the loop goes on.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Args, Event, Reply};
use crate::domain::{BackendError, CallId, ErrorKind, HandlerError, RemoteError};
use crate::typed::{Queue, RegistryError};

pub type Handler<S> = Box<dyn FnMut(&mut S, Args) -> Result<Value, HandlerError> + Send>;

struct Registration<S> {
    bound: Vec<Value>,
    handler: Handler<S>,
}

pub struct Receiver<S> {
    worker: String,
    events: Queue<Event>,
    replies: Queue<Event>,
    handlers: HashMap<String, Registration<S>>,
    serving: bool,
}

impl<S> Receiver<S> {
    pub(crate) fn new(worker: &str, events: Queue<Event>, replies: Queue<Event>) -> Self {
        Self {
            worker: worker.to_string(),
            events,
            replies,
            handlers: HashMap::new(),
            serving: true,
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Register `handler` for events called `name`.
    pub fn accept<F>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        F: FnMut(&mut S, Args) -> Result<Value, HandlerError> + Send + 'static,
    {
        self.accept_bound(name, Vec::new(), handler)
    }

    /// Register `handler` with arguments fixed now; they are prepended to
    /// whatever the emitter sends.
    pub fn accept_bound<F>(
        &mut self,
        name: &str,
        bound: Vec<Value>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: FnMut(&mut S, Args) -> Result<Value, HandlerError> + Send + 'static,
    {
        if self.handlers.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.handlers.insert(
            name.to_string(),
            Registration {
                bound,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    pub fn forget(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn is_serving(&self) -> bool {
        self.serving
    }

    /// Handle at most one pending event without waiting.
    ///
    /// Returns `false` when the stop sentinel is consumed (and from then
    /// on), `true` otherwise, including when nothing was pending.
    pub fn react(&mut self, state: &mut S) -> Result<bool, BackendError> {
        if !self.serving {
            return Ok(false);
        }
        match self.events.get_nowait()? {
            Some(event) => self.dispatch(state, event),
            None => Ok(true),
        }
    }

    /// Like [`react`](Self::react) but waits for the next event.
    pub fn receive(&mut self, state: &mut S) -> Result<bool, BackendError> {
        if !self.serving {
            return Ok(false);
        }
        match self.events.get()? {
            Some(event) => self.dispatch(state, event),
            None => {
                self.serving = false;
                Ok(false)
            }
        }
    }

    /// Dispatch loop: handle events until told to stop.
    pub fn serve(&mut self, state: &mut S) -> Result<(), BackendError> {
        while self.receive(state)? {}
        Ok(())
    }

    fn dispatch(&mut self, state: &mut S, event: Event) -> Result<bool, BackendError> {
        match event {
            Event::Call {
                name,
                args,
                reply_to,
            } => {
                let reply = self.invoke(state, &name, args);
                match (reply_to, reply) {
                    (Some(call), reply) => self.send_reply(call, reply)?,
                    (None, Err(e)) if e.kind == ErrorKind::UnknownEvent => {
                        warn!(worker = %self.worker, event = %name, "no handler, event dropped");
                    }
                    (None, Err(e)) => {
                        error!(worker = %self.worker, event = %name, error = %e, "handler failed");
                    }
                    (None, Ok(_)) => {}
                }
                Ok(true)
            }
            Event::StopServing => {
                debug!(worker = %self.worker, "stop sentinel received");
                self.serving = false;
                // Nothing reads or answers from now on; release pending sync callers.
                self.events.close()?;
                self.replies.close()?;
                Ok(false)
            }
            Event::Reply { call, .. } => {
                warn!(worker = %self.worker, call = %call, "stray reply on event queue dropped");
                Ok(true)
            }
        }
    }

    fn invoke(&mut self, state: &mut S, name: &str, mut args: Args) -> Reply {
        let Some(registration) = self.handlers.get_mut(name) else {
            return Err(RemoteError::new(
                ErrorKind::UnknownEvent,
                format!("{} has no handler for {name}", self.worker),
            ));
        };
        args.prepend(&registration.bound);
        debug!(worker = %self.worker, event = name, "dispatch");
        (registration.handler)(state, args).map_err(RemoteError::from)
    }

    fn send_reply(&self, call: CallId, reply: Reply) -> Result<(), BackendError> {
        if let Err(e) = &reply {
            debug!(worker = %self.worker, call = %call, error = %e, "sync call failed");
        }
        self.replies.put(&Event::Reply { call, reply })
    }
}
