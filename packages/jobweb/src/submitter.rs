//! Cloneable submission handle.

use std::sync::Arc;

use crate::{BoxError, JobHandle, JobResult, SchedulerInner};

/// Submits jobs to a [`Scheduler`][crate::Scheduler] without owning it.
///
/// Submitters are cheaply cloneable and can be moved into job bodies to submit follow-up work
/// from within a running job. Submission does not block on execution, so this never deadlocks.
///
/// A submitter does not keep the worker threads alive: once the scheduler is dropped or shut
/// down, jobs submitted through the submitter resolve with
/// [`JobError::SubmittedAfterShutdown`][crate::JobError::SubmittedAfterShutdown].
///
/// # Example
///
/// ```rust
/// use jobweb::Scheduler;
///
/// let scheduler = Scheduler::new();
/// let submitter = scheduler.submitter();
///
/// let outer = scheduler.submit(move || {
///     let inner = submitter.submit(|| Ok(()));
///     // Submitting from inside a job is fine; so is a later job depending on it.
///     submitter.submit_with(0, &[inner], || Ok(()));
///     Ok(())
/// });
///
/// assert!(outer.wait().is_ok());
/// scheduler.wait_all();
/// ```
#[derive(Clone, Debug)]
pub struct Submitter {
    inner: Arc<SchedulerInner>,
}

impl Submitter {
    pub(crate) fn new(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    /// Submits a job with the default priority (0) and no dependencies.
    ///
    /// See [`Scheduler::submit()`][crate::Scheduler::submit].
    pub fn submit<F>(&self, body: F) -> JobHandle
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.inner.submit(0, &[], Box::new(body))
    }

    /// Submits a job with a priority and dependencies.
    ///
    /// See [`Scheduler::submit_with()`][crate::Scheduler::submit_with].
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
    /// Waiting from inside a job body occupies that worker until the awaited job finishes.
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

    /// Whether the scheduler has begun shutting down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_stopping()
    }
}
