//! ThreadBackend - workers are named OS threads in the current process.
//!
//! Queues are a `Mutex<VecDeque>` plus a `Condvar` so blocking consumers
//! sleep instead of spinning. Poisoned locks are recovered: a panicking
//! worker must not take the queues of its siblings down with it.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::domain::BackendError;
use crate::ports::{
    BackendKind, ConcurrencyBackend, Lock, LockGuard, RawQueue, Worker, WorkerEntry, WorkerStatus,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadBackend;

impl ThreadBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ConcurrencyBackend for ThreadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Threads
    }

    fn create_worker(&self, name: &str, entry: WorkerEntry) -> Box<dyn Worker> {
        Box::new(ThreadWorker::new(name, entry))
    }

    fn create_queue(&self) -> Result<Arc<dyn RawQueue>, BackendError> {
        Ok(Arc::new(ThreadQueue::new()))
    }

    fn create_lock(&self) -> Result<Arc<dyn Lock>, BackendError> {
        Ok(Arc::new(ThreadLock::default()))
    }
}

enum ThreadState {
    Ready(WorkerEntry),
    Running(JoinHandle<()>),
    Done,
}

pub struct ThreadWorker {
    name: String,
    state: ThreadState,
}

impl ThreadWorker {
    pub fn new(name: &str, entry: WorkerEntry) -> Self {
        Self {
            name: name.to_string(),
            state: ThreadState::Ready(entry),
        }
    }
}

impl Worker for ThreadWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let entry = match std::mem::replace(&mut self.state, ThreadState::Done) {
            ThreadState::Ready(entry) => entry,
            other => {
                self.state = other;
                return Err(BackendError::AlreadyStarted(self.name.clone()));
            }
        };
        let handle = thread::Builder::new().name(self.name.clone()).spawn(entry)?;
        debug!(worker = %self.name, "thread started");
        self.state = ThreadState::Running(handle);
        Ok(())
    }

    fn join(&mut self) -> Result<WorkerStatus, BackendError> {
        match std::mem::replace(&mut self.state, ThreadState::Done) {
            ThreadState::Running(handle) => match handle.join() {
                Ok(()) => Ok(WorkerStatus::Exited(0)),
                Err(_) => {
                    warn!(worker = %self.name, "thread panicked");
                    Ok(WorkerStatus::Panicked)
                }
            },
            ThreadState::Ready(entry) => {
                self.state = ThreadState::Ready(entry);
                Err(BackendError::NotStarted(self.name.clone()))
            }
            ThreadState::Done => Err(BackendError::NotStarted(self.name.clone())),
        }
    }

    fn kill(&mut self) -> Result<(), BackendError> {
        match std::mem::replace(&mut self.state, ThreadState::Done) {
            ThreadState::Running(handle) => {
                // Dropping the handle detaches the thread.
                drop(handle);
                warn!(worker = %self.name, "threads cannot be terminated, detached instead");
                Ok(())
            }
            ThreadState::Ready(entry) => {
                self.state = ThreadState::Ready(entry);
                Err(BackendError::NotStarted(self.name.clone()))
            }
            ThreadState::Done => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<String>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ThreadQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl ThreadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RawQueue for ThreadQueue {
    fn put(&self, frame: String) -> Result<(), BackendError> {
        self.lock().items.push_back(frame);
        self.condvar.notify_one();
        Ok(())
    }

    fn get_nowait(&self) -> Result<Option<String>, BackendError> {
        Ok(self.lock().items.pop_front())
    }

    fn get(&self) -> Result<Option<String>, BackendError> {
        let mut guard = self.lock();
        loop {
            if let Some(frame) = guard.items.pop_front() {
                return Ok(Some(frame));
            }
            if guard.closed {
                return Ok(None);
            }
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.lock().items.is_empty())
    }

    fn close(&self) -> Result<(), BackendError> {
        self.lock().closed = true;
        self.condvar.notify_all();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ThreadLock {
    mutex: Mutex<()>,
}

impl Lock for ThreadLock {
    fn acquire(&self) -> Result<LockGuard<'_>, BackendError> {
        let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(LockGuard::new(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn worker_runs_entry_and_joins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let mut worker = ThreadBackend.create_worker(
            "Test.0",
            Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        worker.start().unwrap();
        assert_eq!(worker.join().unwrap(), WorkerStatus::Exited(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_cannot_start_twice() {
        let mut worker = ThreadBackend.create_worker("Test.1", Box::new(|| {}));
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(BackendError::AlreadyStarted(_))));
        worker.join().unwrap();
    }

    #[test]
    fn join_before_start_is_an_error() {
        let mut worker = ThreadBackend.create_worker("Test.2", Box::new(|| {}));
        assert!(matches!(worker.join(), Err(BackendError::NotStarted(_))));
    }

    #[test]
    fn panicking_worker_reports_panicked() {
        let mut worker = ThreadBackend.create_worker("Test.3", Box::new(|| panic!("boom")));
        worker.start().unwrap();
        assert_eq!(worker.join().unwrap(), WorkerStatus::Panicked);
    }

    #[test]
    fn queue_is_fifo() {
        let queue = ThreadQueue::new();
        queue.put("a".into()).unwrap();
        queue.put("b".into()).unwrap();
        assert_eq!(queue.get_nowait().unwrap().as_deref(), Some("a"));
        assert_eq!(queue.get_nowait().unwrap().as_deref(), Some("b"));
        assert_eq!(queue.get_nowait().unwrap(), None);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let queue = ThreadQueue::new();
        queue.put("last".into()).unwrap();
        queue.close().unwrap();
        assert_eq!(queue.get().unwrap().as_deref(), Some("last"));
        assert_eq!(queue.get().unwrap(), None);
    }

    #[test]
    fn blocked_get_wakes_on_put() {
        let queue = Arc::new(ThreadQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        queue.put("late".into()).unwrap();
        assert_eq!(consumer.join().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn close_wakes_every_consumer() {
        let queue = Arc::new(ThreadQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.get().unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        queue.close().unwrap();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn lock_excludes_other_threads() {
        let lock = Arc::new(ThreadLock::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.acquire().unwrap();
                        let seen = counter.load(Ordering::SeqCst);
                        counter.store(seen + 1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }
}
