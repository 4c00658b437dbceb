//! Per-resource read/write locks shared by one provider instance.
//!
//! Entries are created on the first lock attempt and dropped once the last
//! holder releases. Waiters block on a single condition variable and re-check
//! their predicate on every wake. Locks are owned by threads: a thread never
//! blocks on a lock it already holds, and `cleanup_current_thread` releases
//! whatever the calling thread still owns.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use depot_config::{log_cache_debug, log_cache_info};

use crate::error::{CacheError, Result};
use crate::model::ConcreteResource;
use crate::signal::{StopSignal, Worker};

#[derive(Debug, Default)]
struct LockState {
    readers: HashMap<ThreadId, usize>,
    writer: Option<(ThreadId, usize)>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }

    fn written_by_other(&self, me: ThreadId) -> bool {
        matches!(self.writer, Some((owner, _)) if owner != me)
    }

    fn read_by_other(&self, me: ThreadId) -> bool {
        self.readers.keys().any(|t| *t != me)
    }
}

/// Point-in-time view of one held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockReport {
    pub resource: String,
    pub readers: usize,
    pub write_locked: bool,
}

type Table = HashMap<ConcreteResource, LockState>;

pub struct LockTable {
    locks: Mutex<Table>,
    cond: Condvar,
    timeout: Option<Duration>,
    reporter: Mutex<Option<Worker>>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LockTable {
    /// `timeout` bounds every wait; `None` waits forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
            timeout,
            reporter: Mutex::new(None),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a, F>(
        &'a self,
        mut table: MutexGuard<'a, Table>,
        resource: &ConcreteResource,
        blocked: F,
    ) -> Result<MutexGuard<'a, Table>>
    where
        F: Fn(&LockState, ThreadId) -> bool,
    {
        let me = thread::current().id();
        let started = Instant::now();
        while table.get(resource).is_some_and(|s| blocked(s, me)) {
            match self.timeout {
                None => {
                    table = self.cond.wait(table).unwrap_or_else(PoisonError::into_inner);
                }
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(CacheError::LockTimeout {
                            resource: resource.to_string(),
                            waited,
                        });
                    }
                    table = self
                        .cond
                        .wait_timeout(table, limit - waited)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        Ok(table)
    }

    pub fn lock_read(&self, resource: &ConcreteResource) -> Result<()> {
        let table = self.table();
        let mut table = self.wait_while(table, resource, |s, me| s.written_by_other(me))?;
        let me = thread::current().id();
        *table
            .entry(resource.clone())
            .or_default()
            .readers
            .entry(me)
            .or_insert(0) += 1;
        Ok(())
    }

    pub fn lock_write(&self, resource: &ConcreteResource) -> Result<()> {
        let table = self.table();
        let mut table = self.wait_while(table, resource, |s, me| {
            s.written_by_other(me) || s.read_by_other(me)
        })?;
        let me = thread::current().id();
        let state = table.entry(resource.clone()).or_default();
        match &mut state.writer {
            Some((_, depth)) => *depth += 1,
            None => state.writer = Some((me, 1)),
        }
        Ok(())
    }

    /// Release one read hold of the calling thread. Returns `false` if it held none.
    pub fn unlock_read(&self, resource: &ConcreteResource) -> bool {
        let me = thread::current().id();
        self.release(resource, |state| match state.readers.get_mut(&me) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                state.readers.remove(&me);
                true
            }
            None => false,
        })
    }

    /// Release one write hold of the calling thread.
    pub fn unlock_write(&self, resource: &ConcreteResource) -> bool {
        self.unlock_write_for(resource, thread::current().id())
    }

    /// Release one write hold owned by `owner`, from any thread. Used by writers
    /// that may be committed or dropped away from the thread that opened them.
    pub fn unlock_write_for(&self, resource: &ConcreteResource, owner: ThreadId) -> bool {
        self.release(resource, |state| match &mut state.writer {
            Some((o, depth)) if *o == owner && *depth > 1 => {
                *depth -= 1;
                true
            }
            Some((o, _)) if *o == owner => {
                state.writer = None;
                true
            }
            _ => false,
        })
    }

    fn release<F>(&self, resource: &ConcreteResource, f: F) -> bool
    where
        F: FnOnce(&mut LockState) -> bool,
    {
        let mut table = self.table();
        let Some(state) = table.get_mut(resource) else {
            return false;
        };
        let released = f(state);
        if state.is_free() {
            table.remove(resource);
        }
        drop(table);
        if released {
            self.cond.notify_all();
        }
        released
    }

    pub fn is_read_locked(&self, resource: &ConcreteResource) -> bool {
        self.table()
            .get(resource)
            .is_some_and(|s| !s.readers.is_empty())
    }

    pub fn is_write_locked(&self, resource: &ConcreteResource) -> bool {
        self.table()
            .get(resource)
            .is_some_and(|s| s.writer.is_some())
    }

    /// Block until no other thread holds a read lock on `resource`.
    pub fn wait_for_read_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        let table = self.table();
        self.wait_while(table, resource, |s, me| s.read_by_other(me))?;
        Ok(())
    }

    /// Block until no other thread holds the write lock on `resource`.
    pub fn wait_for_write_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        let table = self.table();
        self.wait_while(table, resource, |s, me| s.written_by_other(me))?;
        Ok(())
    }

    /// Drop every lock owned by the calling thread. Returns how many entries changed.
    pub fn cleanup_current_thread(&self) -> usize {
        let me = thread::current().id();
        let mut table = self.table();
        let mut changed = 0;
        table.retain(|resource, state| {
            let mut touched = state.readers.remove(&me).is_some();
            if matches!(state.writer, Some((owner, _)) if owner == me) {
                state.writer = None;
                touched = true;
            }
            if touched {
                changed += 1;
                log_cache_debug!("Released lock held by finished thread", resource = tracing::field::display(resource));
            }
            !state.is_free()
        });
        drop(table);
        if changed > 0 {
            self.cond.notify_all();
        }
        changed
    }

    /// Write-lock `resource` until the guard drops.
    pub fn write_guard<'a>(&'a self, resource: &'a ConcreteResource) -> Result<WriteGuard<'a>> {
        self.lock_write(resource)?;
        Ok(WriteGuard {
            table: self,
            resource,
        })
    }

    /// Currently held locks, sorted by resource.
    pub fn snapshot(&self) -> Vec<LockReport> {
        let mut reports: Vec<_> = self
            .table()
            .iter()
            .map(|(resource, state)| LockReport {
                resource: resource.to_string(),
                readers: state.readers.values().sum(),
                write_locked: state.writer.is_some(),
            })
            .collect();
        reports.sort_by(|a, b| a.resource.cmp(&b.resource));
        reports
    }

    /// Log held locks every `interval` until [`stop_reporting`](Self::stop_reporting).
    /// Starting twice keeps the first reporter.
    pub fn start_reporting(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut reporter = self.reporter.lock().unwrap_or_else(PoisonError::into_inner);
        if reporter.is_some() {
            return Ok(());
        }

        let signal = Arc::new(StopSignal::default());
        let stop = signal.clone();
        let table = Arc::downgrade(self);
        let thread = thread::Builder::new()
            .name("depot-lock-report".to_string())
            .spawn(move || {
                while !stop.wait_timeout(interval) {
                    let Some(table) = table.upgrade() else {
                        return;
                    };
                    for report in table.snapshot() {
                        log_cache_info!(
                            "Lock held",
                            resource = report.resource.as_str(),
                            readers = report.readers as u64,
                            write_locked = report.write_locked
                        );
                    }
                }
            })?;

        *reporter = Some(Worker { signal, thread });
        Ok(())
    }

    pub fn stop_reporting(&self) {
        let worker = self
            .reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }
}

pub struct WriteGuard<'a> {
    table: &'a LockTable,
    resource: &'a ConcreteResource,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.table.unlock_write(self.resource);
    }
}

impl Drop for LockTable {
    fn drop(&mut self) {
        if let Some(worker) = self
            .reporter
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.signal.stop();
        }
    }
}
