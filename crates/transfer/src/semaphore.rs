use std::sync::{Condvar, Mutex};

/// A counting semaphore, initialized to zero.
///
/// The standard library has no counting semaphore, and the write pipeline's
/// four-semaphore hand-off protocol (`sem_ready`, `sem_data_need`,
/// `sem_data_avail`, `sem_data_written`) relies on posts accumulating even
/// when nobody is waiting yet -- a plain rendezvous channel does not give
/// that guarantee, so this is a small `Mutex<u32>` + `Condvar` built for the
/// purpose rather than a channel substitution.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<u32>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Increments the count and wakes one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.condvar.notify_one();
    }

    /// Blocks until the count is non-zero, then decrements it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            count = self
                .condvar
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }

    /// Like [`Self::wait`], but gives up after `timeout` and returns `false`
    /// instead of decrementing. Used by the write pipeline's low-speed
    /// watchdog to re-check for stalled progress without busy-looping.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        let (mut count, result) = self
            .condvar
            .wait_timeout_while(count, timeout, |c| *c == 0)
            .unwrap_or_else(|e| e.into_inner());
        if result.timed_out() {
            false
        } else {
            *count -= 1;
            true
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn post_before_wait_is_not_lost() {
        let sem = Semaphore::new();
        sem.post();
        sem.wait(); // must not block: the post already happened.
    }

    #[test]
    fn wait_blocks_until_posted() {
        let sem = Arc::new(Semaphore::new());
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            sem2.post();
        });
        sem.wait();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_gives_up_when_nothing_is_posted() {
        let sem = Semaphore::new();
        assert!(!sem.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn wait_timeout_succeeds_when_already_posted() {
        let sem = Semaphore::new();
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn posts_accumulate_across_multiple_waits() {
        let sem = Semaphore::new();
        sem.post();
        sem.post();
        sem.post();
        sem.wait();
        sem.wait();
        sem.wait();
    }
}
