//! Log output shared by every worker of a run.
//!
//! Each formatted record is written while holding the backend's shared
//! [`Lock`], so lines from concurrent threads or forked processes never
//! interleave on stderr.

use std::io::{self, Write};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::ports::{Lock, LockGuard};

/// `MakeWriter` handing out stderr writers that hold the lock.
#[derive(Clone)]
pub struct LockedStderr {
    lock: Arc<dyn Lock>,
}

impl LockedStderr {
    pub fn new(lock: Arc<dyn Lock>) -> Self {
        Self { lock }
    }
}

pub struct LockedWriter<'a> {
    _guard: Option<LockGuard<'a>>,
    stderr: io::Stderr,
}

impl Write for LockedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stderr.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stderr.flush()
    }
}

impl<'a> MakeWriter<'a> for LockedStderr {
    type Writer = LockedWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A lock failure must not lose the record; write unlocked instead.
        LockedWriter {
            _guard: self.lock.acquire().ok(),
            stderr: io::stderr(),
        }
    }
}

/// Filter from `RUST_LOG` when set, otherwise from `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Call once, before any worker starts.
pub fn init_tracing(
    lock: Arc<dyn Lock>,
    filter: EnvFilter,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LockedStderr::new(lock))
        .with_thread_names(true)
        .with_target(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::threads::ThreadLock;
    use crate::ports::Lock;

    struct CountingLock(std::sync::Mutex<usize>);

    impl Lock for CountingLock {
        fn acquire(&self) -> Result<LockGuard<'_>, crate::domain::BackendError> {
            *self.0.lock().unwrap() += 1;
            Ok(LockGuard::new(()))
        }
    }

    #[test]
    fn every_writer_takes_the_lock() {
        let counting = Arc::new(CountingLock(std::sync::Mutex::new(0)));
        let make = LockedStderr::new(counting.clone());
        for _ in 0..3 {
            let mut writer = make.make_writer();
            writer.write_all(b"").unwrap();
        }
        assert_eq!(*counting.0.lock().unwrap(), 3);
    }

    #[test]
    fn writer_holds_the_lock_until_dropped() {
        let lock: Arc<ThreadLock> = Arc::new(ThreadLock::default());
        let make = LockedStderr::new(lock.clone());
        let writer = make.make_writer();
        let contender = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(!contender.is_finished());
        drop(writer);
        contender.join().unwrap();
    }
}
