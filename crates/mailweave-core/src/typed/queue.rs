//! Typed queues over the backend's raw frame queues.
//!
//! - `Queue<T>`: serializes on `put`, deserializes on `get`
//! - `Channel<T>`: "for each task" iteration over a task queue

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::domain::BackendError;
use crate::ports::{ConcurrencyBackend, RawQueue};

pub struct Queue<T> {
    raw: Arc<dyn RawQueue>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Queue").field(&self.raw).finish()
    }
}

impl<T: Serialize + DeserializeOwned> Queue<T> {
    pub fn new(backend: &dyn ConcurrencyBackend) -> Result<Self, BackendError> {
        Ok(Self::from_raw(backend.create_queue()?))
    }

    pub fn from_raw(raw: Arc<dyn RawQueue>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Enqueue `value`. Values that cannot be serialized are rejected here,
    /// before anything reaches the queue.
    pub fn put(&self, value: &T) -> Result<(), BackendError> {
        let frame = serde_json::to_string(value).map_err(BackendError::Serialize)?;
        self.raw.put(frame)
    }

    pub fn get_nowait(&self) -> Result<Option<T>, BackendError> {
        self.raw.get_nowait()?.map(decode).transpose()
    }

    /// Wait for the next value; `None` once the queue is closed and drained.
    pub fn get(&self) -> Result<Option<T>, BackendError> {
        self.raw.get()?.map(decode).transpose()
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        self.raw.is_empty()
    }

    /// No more values will be put; blocked consumers are released.
    pub fn close(&self) -> Result<(), BackendError> {
        self.raw.close()
    }

    /// Populate the queue completely, then close it. Consumers started at
    /// any time see every item and stop only after the last one.
    pub fn fill<'a, I>(&self, items: I) -> Result<usize, BackendError>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut count = 0;
        for item in items {
            self.put(item)?;
            count += 1;
        }
        self.close()?;
        Ok(count)
    }
}

fn decode<T: DeserializeOwned>(frame: String) -> Result<T, BackendError> {
    serde_json::from_str(&frame).map_err(BackendError::Deserialize)
}

/// Iterates the tasks of a filled queue. Each item is handed to exactly one
/// of the channels sharing the queue.
pub struct Channel<T> {
    queue: Queue<T>,
    done: bool,
}

impl<T> Channel<T> {
    pub fn new(queue: Queue<T>) -> Self {
        Self { queue, done: false }
    }
}

impl<T: Serialize + DeserializeOwned> Iterator for Channel<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        match self.queue.get() {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                error!(error = %e, "task queue failed, no more tasks taken");
                self.done = true;
                None
            }
        }
    }
}
