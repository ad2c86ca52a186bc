//! Single-slot mailbox for handing one value across threads.
//!
//! The producer (a power-meter polling loop, for instance) posts values at
//! will; the consumer takes at most one at a time. Posting overwrites an
//! unconsumed value and taking empties the slot, so a value is never
//! consumed twice.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::stop::StopToken;

/// Why a wait on the mailbox ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Timeout elapsed before a value was posted
    Timeout,
    /// Stop was requested while waiting
    Stopped,
    /// Mailbox was closed by its owner
    Closed,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    closed: bool,
    posted: u64,
}

/// Thread-safe single-value handoff with timed waits.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
                posted: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Post a value, replacing any unconsumed one. Returns false once closed.
    pub fn post(&self, value: T) -> bool {
        let mut slot = self.lock_slot();
        if slot.closed {
            return false;
        }
        slot.value = Some(value);
        slot.posted += 1;
        self.ready.notify_all();
        true
    }

    /// Take the current value without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.lock_slot().value.take()
    }

    /// Discard any unconsumed value.
    pub fn clear(&self) {
        self.lock_slot().value = None;
    }

    /// Reject further posts and wake waiters.
    pub fn close(&self) {
        let mut slot = self.lock_slot();
        slot.closed = true;
        slot.value = None;
        self.ready.notify_all();
    }

    /// Accept posts again after `close`.
    pub fn reopen(&self) {
        let mut slot = self.lock_slot();
        slot.closed = false;
        slot.value = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock_slot().closed
    }

    /// Total number of values ever posted.
    pub fn posted(&self) -> u64 {
        self.lock_slot().posted
    }

    /// Block until a value arrives, the timeout elapses, or `stop` is set.
    ///
    /// The stop flag is checked at `poll_interval` granularity.
    pub fn wait_take(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        stop: &StopToken,
    ) -> Result<T, WaitError> {
        let deadline = Instant::now() + timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut slot = self.lock_slot();
        loop {
            if let Some(value) = slot.value.take() {
                return Ok(value);
            }
            if slot.closed {
                return Err(WaitError::Closed);
            }
            if stop.is_stopped() {
                return Err(WaitError::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout);
            }
            let wait = poll_interval.min(deadline - now);
            slot = match self.ready.wait_timeout(slot, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_value_consumed_once() {
        let mailbox = Mailbox::new();
        assert!(mailbox.post(1.5));
        assert_eq!(mailbox.try_take(), Some(1.5));
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_post_overwrites() {
        let mailbox = Mailbox::new();
        mailbox.post(1);
        mailbox.post(2);
        assert_eq!(mailbox.try_take(), Some(2));
        assert_eq!(mailbox.posted(), 2);
    }

    #[test]
    fn test_wait_timeout() {
        let mailbox: Mailbox<f64> = Mailbox::new();
        let start = Instant::now();
        let result = mailbox.wait_take(
            Duration::from_millis(30),
            Duration::from_millis(5),
            &StopToken::new(),
        );
        assert_eq!(result, Err(WaitError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_stopped() {
        let mailbox: Mailbox<f64> = Mailbox::new();
        let stop = StopToken::new();
        stop.stop();
        let result = mailbox.wait_take(Duration::from_secs(5), Duration::from_millis(5), &stop);
        assert_eq!(result, Err(WaitError::Stopped));
    }

    #[test]
    fn test_cross_thread_handoff() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mailbox.post(42u32);
            })
        };
        let value = mailbox.wait_take(
            Duration::from_secs(2),
            Duration::from_millis(5),
            &StopToken::new(),
        );
        producer.join().unwrap();
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn test_closed_rejects_posts() {
        let mailbox = Mailbox::new();
        mailbox.close();
        assert!(!mailbox.post(1));
        let result = mailbox.wait_take(
            Duration::from_secs(1),
            Duration::from_millis(5),
            &StopToken::new(),
        );
        assert_eq!(result, Err(WaitError::Closed));
        mailbox.reopen();
        assert!(mailbox.post(3));
    }
}
