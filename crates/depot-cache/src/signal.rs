use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Wakeable stop flag for background threads.
#[derive(Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub(crate) fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    /// Sleep for `period` or until stopped. Returns `true` once stopped.
    pub(crate) fn wait_timeout(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = self
                .cond
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// A running background thread and the signal that stops it.
pub(crate) struct Worker {
    pub(crate) signal: std::sync::Arc<StopSignal>,
    pub(crate) thread: JoinHandle<()>,
}

impl Worker {
    /// Signal and join, unless called from the worker itself.
    pub(crate) fn shutdown(self) {
        self.signal.stop();
        if self.thread.thread().id() != std::thread::current().id() {
            let _ = self.thread.join();
        }
    }
}
