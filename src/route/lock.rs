use std::sync::{Condvar, Mutex};

/// Cooperative pre-emption for long-running routing work: the worker calls
/// `wait` at suspension points and a UI thread releases it with `signal`.
/// With granularity 0 (the default) both are cheap no-ops.
#[derive(Debug, Default)]
pub struct StepLock {
    state: Mutex<StepState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct StepState {
    seq: u64,
    granularity: u32,
}

impl StepLock {
    pub fn new(granularity: u32) -> Self {
        Self { state: Mutex::new(StepState { seq: 0, granularity }), cv: Condvar::new() }
    }

    pub fn set_granularity(&self, n: u32) {
        let release = {
            let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let release = n == 0 && s.granularity != 0;
            s.granularity = n;
            if release {
                s.seq += 1;
            }
            release
        };
        if release {
            self.cv.notify_all();
        }
    }

    /// Block until the next signal if this suspension point's granularity is
    /// at or below the configured one.
    pub fn wait(&self, granularity: u32) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if granularity > s.granularity || s.granularity == 0 {
            return;
        }
        let cur = s.seq;
        while s.seq == cur {
            s = self.cv.wait(s).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn signal(&self) {
        {
            let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if s.granularity == 0 {
                return;
            }
            s.seq += 1;
        }
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_at_zero_granularity() {
        let lock = StepLock::new(0);
        // Must not block.
        lock.wait(1);
        lock.signal();
    }
}
