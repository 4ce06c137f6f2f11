//! Message passing between a supervisor and the worker it commands.
//!
//! An [`Emitter`] queues named calls; the [`Receiver`] inside the target
//! worker pops them and runs the handler registered under the name.
//! Synchronous calls carry a [`CallId`](crate::domain::CallId) and wait for
//! the matching [`Event::Reply`] on a second queue.

pub mod args;
pub mod emitter;
pub mod event;
pub mod receiver;

pub use self::args::Args;
pub use self::emitter::Emitter;
pub use self::event::{Event, Reply};
pub use self::receiver::{Handler, Receiver};

use crate::domain::BackendError;
use crate::ports::ConcurrencyBackend;
use crate::typed::Queue;

/// Create both ends of a pair bound to `worker`.
pub fn new_emitter_receiver<S>(
    backend: &dyn ConcurrencyBackend,
    worker: &str,
) -> Result<(Receiver<S>, Emitter), BackendError> {
    let events = Queue::new(backend)?;
    let replies = Queue::new(backend)?;
    Ok((
        Receiver::new(worker, events.clone(), replies.clone()),
        Emitter::new(worker, events, replies),
    ))
}
