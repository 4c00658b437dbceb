//! Bounded worker pool running cancellable, time-boxed transfer jobs.

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use depot_cache::ConcreteResource;
use depot_config::{log_transfer_debug, log_transfer_error, TransportManagerConfig};
use rayon::ThreadPool;

use crate::error::{Result, TransferError};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state of one running job: cancellation flag and byte counters.
pub struct JobContext {
    id: u64,
    started: Instant,
    cancelled: AtomicBool,
    transferred: AtomicU64,
    expected: AtomicU64,
}

impl JobContext {
    fn new() -> Self {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            started: Instant::now(),
            cancelled: AtomicBool::new(false),
            transferred: AtomicU64::new(0),
            expected: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Transports call this once the total size is known (e.g. from a
    /// content-length header).
    pub fn set_expected(&self, bytes: u64) {
        self.expected.store(bytes, Ordering::Relaxed);
    }

    pub fn expected(&self) -> u64 {
        self.expected.load(Ordering::Relaxed)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: usize) {
        self.transferred.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Best known size of the transfer.
    pub fn size(&self) -> u64 {
        self.expected().max(self.transferred())
    }

    fn check(&self) -> io::Result<()> {
        if self.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "transfer cancelled"));
        }
        Ok(())
    }
}

/// Counts bytes into the job context and fails once the job is cancelled.
pub struct ProgressWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    ctx: &'a JobContext,
}

impl<'a, W: Write + ?Sized> ProgressWriter<'a, W> {
    pub fn new(inner: &'a mut W, ctx: &'a JobContext) -> Self {
        Self { inner, ctx }
    }
}

impl<W: Write + ?Sized> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ctx.check()?;
        let n = self.inner.write(buf)?;
        self.ctx.record(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read-side twin of [`ProgressWriter`], used for uploads.
pub struct ProgressReader<'a, R: Read + ?Sized> {
    inner: &'a mut R,
    ctx: &'a JobContext,
}

impl<'a, R: Read + ?Sized> ProgressReader<'a, R> {
    pub fn new(inner: &'a mut R, ctx: &'a JobContext) -> Self {
        Self { inner, ctx }
    }
}

impl<R: Read + ?Sized> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ctx.check()?;
        let n = self.inner.read(buf)?;
        self.ctx.record(n);
        Ok(n)
    }
}

struct JobShared<T> {
    ctx: JobContext,
    result: Mutex<Option<Result<T>>>,
    done: Condvar,
}

/// Handle on a submitted job. Clones observe the same result.
pub struct JobHandle<T> {
    shared: Arc<JobShared<T>>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> JobHandle<T> {
    pub fn context(&self) -> &JobContext {
        &self.shared.ctx
    }

    pub fn id(&self) -> u64 {
        self.shared.ctx.id
    }

    pub fn cancel(&self) {
        self.shared.ctx.cancel();
    }

    /// Wait up to `period` for the result. A job that panicked yields a
    /// `Generic` error.
    pub fn wait(&self, period: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + period;
        let mut slot = self.shared.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .shared
                .done
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait in periods of `timeout_seconds * timeout_overextension_factor`.
    /// Large transfers earn extra periods in proportion to their size; when
    /// the allowance runs out the job is cancelled and `Timeout` returned.
    pub fn wait_scaled(
        &self,
        config: &TransportManagerConfig,
        resource: &ConcreteResource,
        known_size: Option<u64>,
    ) -> Result<T> {
        let period = config.wait_period(resource.timeout_seconds());
        let started = Instant::now();
        let mut periods = 0u64;
        loop {
            if let Some(result) = self.wait(period) {
                return result;
            }
            periods += 1;
            let size = known_size.unwrap_or(0).max(self.context().size());
            if !config.should_extend_wait(size, periods) {
                self.cancel();
                return Err(TransferError::timeout(resource, started.elapsed()));
            }
            log_transfer_debug!(
                "Extending wait for large transfer",
                resource = tracing::field::display(resource),
                size = size,
                periods = periods
            );
        }
    }
}

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("depot-transfer-{}", i))
            .build()
            .map_err(|e| TransferError::Generic {
                resource: String::new(),
                message: format!("failed to start transfer workers: {}", e),
            })?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on the pool. A panic inside the job is caught and stored as
    /// the job's result, so waiters are always released.
    pub fn submit<T, F>(&self, resource: &ConcreteResource, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobContext) -> T + Send + 'static,
    {
        let shared = Arc::new(JobShared {
            ctx: JobContext::new(),
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        let worker = shared.clone();
        let resource = resource.clone();
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(&worker.ctx))).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                log_transfer_error!(
                    "Transfer job panicked",
                    resource = tracing::field::display(&resource),
                    error = message.as_str()
                );
                TransferError::generic(&resource, format!("transfer job panicked: {}", message))
            });
            *worker.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            worker.done.notify_all();
        });
        JobHandle { shared }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
