//! Scheduler lifecycle and configuration.

use std::num::NonZero;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{BoxError, JobHandle, JobResult, SchedulerInner, Submitter};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_THREAD_NAME_PREFIX: &str = "jobweb";

/// A fixed pool of worker threads that runs jobs in dependency order.
///
/// Each worker owns a ready queue ordered by job priority. A job becomes ready when every job it
/// depends on has finished, at which point it is placed on a randomly selected worker's queue.
/// Workers take work from their own queue first and steal from sibling queues when their own
/// queue is empty.
///
/// # Ordering
///
/// * A job never starts before every dependency named at submission has finished.
/// * Within one worker's queue, higher priority jobs are taken first. Across queues there are no
///   priority guarantees, as placement is random and idle workers steal.
/// * Jobs without a dependency relationship may run in any order, including concurrently.
///
/// # Failures
///
/// A job fails if its body returns an error or panics. The failure is recorded as the outcome of
/// that job only. Jobs that depend on a failed job still run: failure is not propagated to
/// dependents. Inspect the dependency's handle from within the dependent if this matters.
///
/// # Shutdown
///
/// Dropping the scheduler or calling [`shutdown()`][Self::shutdown] stops the workers after any
/// jobs they are executing have finished. Jobs that had not started yet are resolved with
/// [`JobError::Abandoned`][crate::JobError::Abandoned], and jobs submitted afterwards are
/// resolved with [`JobError::SubmittedAfterShutdown`][crate::JobError::SubmittedAfterShutdown].
/// No handle is left waiting forever.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use jobweb::Scheduler;
///
/// let scheduler = Scheduler::new();
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..10 {
///     let counter = Arc::clone(&counter);
///     scheduler.submit(move || {
///         counter.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     });
/// }
///
/// scheduler.wait_all();
/// assert_eq!(counter.load(Ordering::Relaxed), 10);
/// ```
#[derive(Debug)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler with one worker per available processor.
    ///
    /// Use [`Scheduler::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a scheduler with the given number of workers.
    #[must_use]
    pub fn with_workers(worker_count: NonZero<usize>) -> Self {
        Self::builder().worker_count(worker_count).build()
    }

    /// Creates a builder for configuring the scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Submits a job with the default priority (0) and no dependencies.
    ///
    /// The job may start executing before this method returns.
    pub fn submit<F>(&self, body: F) -> JobHandle
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.inner.submit(0, &[], Box::new(body))
    }

    /// Submits a job that starts only after every job in `dependencies` has finished.
    ///
    /// Among ready jobs in the same queue, a higher `priority` runs earlier.
    ///
    /// After shutdown has begun, the body is dropped without running and the returned handle is
    /// already resolved with [`JobError::SubmittedAfterShutdown`][crate::JobError].
    ///
    /// # Panics
    ///
    /// Panics if any of the dependencies was submitted to a different scheduler.
    pub fn submit_with<F>(&self, priority: i32, dependencies: &[JobHandle], body: F) -> JobHandle
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.inner.submit(priority, dependencies, Box::new(body))
    }

    /// Blocks until the job has finished and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the [`JobError`][crate::JobError] the job finished with.
    ///
    /// # Panics
    ///
    /// Panics if the job was submitted to a different scheduler.
    pub fn wait_for(&self, handle: &JobHandle) -> JobResult {
        self.inner.assert_owned(handle);
        handle.wait()
    }

    /// Blocks until no job is queued or executing.
    ///
    /// This is a best-effort barrier: jobs submitted by other threads while this call is waiting
    /// may or may not be waited for, but the call never returns while any job is queued or
    /// executing. Returns immediately if there is no outstanding work.
    ///
    /// Failed jobs do not affect this call. Consult individual handles to discover failures.
    ///
    /// # Panics
    ///
    /// Panics if called from a job running on this scheduler, as that would wait for itself.
    pub fn wait_all(&self) {
        self.inner.wait_all();
    }

    /// Stops accepting new work, waits for executing jobs to finish and joins all workers.
    ///
    /// Jobs that did not get to run are resolved as abandoned. Calling this more than once
    /// has no further effect. A call that races with another one returns only after the other
    /// has finished, except when made from a job on this scheduler, which returns immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_stopping()
    }

    /// Returns a handle that can submit jobs to this scheduler from anywhere, including from
    /// inside job bodies.
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        Submitter::new(Arc::clone(&self.inner))
    }

    /// The number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> NonZero<usize> {
        self.inner.worker_count()
    }

    /// A best-effort snapshot of the scheduler's load.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// Builder for configuring a [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerBuilder {
    worker_count: Option<NonZero<usize>>,
    idle_timeout: Duration,
    thread_name_prefix: String,
}

impl SchedulerBuilder {
    fn new() -> Self {
        Self {
            worker_count: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Sets the number of worker threads.
    ///
    /// Default is the available parallelism reported by the operating system.
    #[must_use]
    pub fn worker_count(mut self, count: NonZero<usize>) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the longest time an idle worker sleeps before looking for work again.
    ///
    /// Workers are woken when work becomes ready, so this mainly bounds the delay in picking up
    /// work when several jobs become ready at once. Default is 10 ms.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the prefix of worker thread names. Workers are named `{prefix}-{index}`.
    ///
    /// Default is `jobweb`.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Builds the scheduler and starts its worker threads.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to create a worker thread.
    #[must_use]
    pub fn build(self) -> Scheduler {
        let worker_count = self.worker_count.unwrap_or_else(default_worker_count);

        Scheduler {
            inner: SchedulerInner::start(
                worker_count,
                self.idle_timeout,
                &self.thread_name_prefix,
            ),
        }
    }
}

fn default_worker_count() -> NonZero<usize> {
    thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
}

/// A point-in-time view of scheduler load.
///
/// Each figure is read separately, so the values are not mutually consistent under load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedulerStats {
    queued: usize,
    active: usize,
    workers: NonZero<usize>,
}

impl SchedulerStats {
    pub(crate) fn new(queued: usize, active: usize, workers: NonZero<usize>) -> Self {
        Self {
            queued,
            active,
            workers,
        }
    }

    /// Jobs that are ready and waiting in a queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Jobs that a worker is executing.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active
    }

    /// The number of worker threads.
    #[must_use]
    pub fn workers(&self) -> NonZero<usize> {
        self.workers
    }
}
