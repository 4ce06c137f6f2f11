//! Emitter - the controller-side end of an emitter/receiver pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Args, Event};
use crate::domain::{CallId, EmitError};
use crate::typed::Queue;

/// Commands the worker behind a receiver. Cheap to clone; every clone
/// shares the same queues and the same stop latch.
#[derive(Clone, Debug)]
pub struct Emitter {
    worker: Arc<str>,
    events: Queue<Event>,
    replies: Queue<Event>,
    stopped: Arc<AtomicBool>,
}

impl Emitter {
    pub(crate) fn new(worker: &str, events: Queue<Event>, replies: Queue<Event>) -> Self {
        Self {
            worker: Arc::from(worker),
            events,
            replies,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Name of the worker this emitter talks to.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Fire-and-forget: returns once the event is queued.
    pub fn call(&self, name: &str, args: Args) -> Result<(), EmitError> {
        debug!(worker = %self.worker, event = name, "emit");
        self.events.put(&Event::call(name, args))?;
        Ok(())
    }

    /// Queue the call and block until its reply arrives. A handler error is
    /// returned as [`EmitError::Remote`] carrying the handler's message.
    ///
    /// Callers sharing one emitter take replies from one queue and put back
    /// the ones they do not own. If the receiver stops while a reply is out
    /// for such a round trip, its owner can find the queue closed and empty
    /// and get [`EmitError::Disconnected`] although its reply was produced.
    /// Supervisors drive each driver emitter from a single caller.
    pub fn call_sync(&self, name: &str, args: Args) -> Result<Value, EmitError> {
        let id = CallId::generate();
        debug!(worker = %self.worker, event = name, call = %id, "emit sync");
        self.events.put(&Event::call_sync(name, args, id))?;
        loop {
            match self.replies.get()? {
                Some(Event::Reply { call, reply }) if call == id => {
                    return reply.map_err(|source| EmitError::Remote {
                        worker: self.worker.to_string(),
                        event: name.to_string(),
                        source,
                    });
                }
                // Someone else's reply: hand it back and let its owner run.
                Some(other) => {
                    self.replies.put(&other)?;
                    std::thread::yield_now();
                }
                None => {
                    return Err(EmitError::Disconnected {
                        worker: self.worker.to_string(),
                        event: name.to_string(),
                    });
                }
            }
        }
    }

    /// [`call_sync`](Self::call_sync), decoding the returned value.
    pub fn call_sync_as<T: DeserializeOwned>(&self, name: &str, args: Args) -> Result<T, EmitError> {
        let value = self.call_sync(name, args)?;
        serde_json::from_value(value).map_err(|source| EmitError::Decode {
            event: name.to_string(),
            source,
        })
    }

    /// Ask the dispatch loop to exit. Idempotent.
    pub fn stop_serving(&self) -> Result<(), EmitError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(worker = %self.worker, "stop serving");
        self.events.put(&Event::StopServing)?;
        Ok(())
    }
}
