//! Timeline semaphores for cross-queue ordering.
//!
//! A semaphore is a monotonically increasing u64 counter. Signaled values
//! are never un-signaled; waiters block until the observed value reaches
//! their target or the timeline fails. Waits are condvar-based (no
//! spinning) and support deadlines, with timeout distinguished from
//! permanent failure.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug)]
struct State {
    value: u64,
    failure: Option<String>,
}

/// A monotonic timeline counter shared between queues.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: u64) -> Self {
        Self {
            state: Mutex::new(State {
                value: initial,
                failure: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current timeline value, or the failure if the timeline is poisoned.
    pub fn query(&self) -> Result<u64> {
        let s = self.state.lock().unwrap();
        match &s.failure {
            Some(reason) => Err(Error::Fatal(reason.clone())),
            None => Ok(s.value),
        }
    }

    /// Advances the timeline to `value`. The timeline only moves forward:
    /// signaling a value at or below the current one is an error.
    pub fn signal(&self, value: u64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if let Some(reason) = &s.failure {
            return Err(Error::Fatal(reason.clone()));
        }
        if value <= s.value {
            return Err(Error::InvalidArgument(format!(
                "semaphore signal {value} does not advance current value {}",
                s.value
            )));
        }
        s.value = value;
        self.cond.notify_all();
        Ok(())
    }

    /// Poisons the timeline. All current and future waiters observe
    /// [`Error::Fatal`]; the stored value never changes again.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut s = self.state.lock().unwrap();
        if s.failure.is_none() {
            s.failure = Some(reason.into());
        }
        self.cond.notify_all();
    }

    /// Blocks until the timeline reaches `target`.
    pub fn wait(&self, target: u64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        loop {
            if let Some(reason) = &s.failure {
                return Err(Error::Fatal(reason.clone()));
            }
            if s.value >= target {
                return Ok(());
            }
            s = self.cond.wait(s).unwrap();
        }
    }

    /// Blocks until the timeline reaches `target` or `timeout` elapses.
    /// Returns [`Error::DeadlineExceeded`] on timeout; retrying is valid.
    pub fn wait_timeout(&self, target: u64, timeout: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        let mut s = self.state.lock().unwrap();
        loop {
            if let Some(reason) = &s.failure {
                return Err(Error::Fatal(reason.clone()));
            }
            if s.value >= target {
                return Ok(());
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(Error::DeadlineExceeded);
            }
            let (guard, _timeout_result) = self.cond.wait_timeout(s, deadline - now).unwrap();
            s = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_advances_and_wait_returns() {
        let sem = Semaphore::new(0);
        sem.signal(3).unwrap();
        assert_eq!(sem.query().unwrap(), 3);
        sem.wait(3).unwrap();
        sem.wait(1).unwrap();
    }

    #[test]
    fn signal_never_regresses() {
        let sem = Semaphore::new(5);
        assert!(matches!(sem.signal(5), Err(Error::InvalidArgument(_))));
        assert!(matches!(sem.signal(2), Err(Error::InvalidArgument(_))));
        assert_eq!(sem.query().unwrap(), 5);
    }

    #[test]
    fn timeout_is_not_failure() {
        let sem = Semaphore::new(0);
        let err = sem
            .wait_timeout(1, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        // The timeline is still healthy.
        sem.signal(1).unwrap();
        sem.wait_timeout(1, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn failure_wakes_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || sem.wait(10))
        };
        std::thread::sleep(Duration::from_millis(20));
        sem.fail("device lost");
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(Error::Fatal(_))));
        assert!(matches!(sem.query(), Err(Error::Fatal(_))));
    }

    #[test]
    fn cross_thread_wait_observes_signal() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || sem.wait(7))
        };
        sem.signal(7).unwrap();
        waiter.join().unwrap().unwrap();
    }
}
