//! Handles to submitted jobs.

use std::future::Future;
use std::sync::Arc;

use derive_more::Display;

use crate::{JobNode, JobResult};

/// Identifies a job within the scheduler that accepted it.
///
/// Identifiers are assigned in submission order, starting from zero.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("job#{_0}")]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value of the identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A handle to a submitted job.
///
/// The handle serves two purposes:
///
/// 1. It can be passed as a dependency when submitting later jobs, which will then not start
///    until this job has finished.
/// 2. It gives access to the outcome of the job, either by blocking ([`wait()`][Self::wait]),
///    by polling ([`try_outcome()`][Self::try_outcome]) or asynchronously
///    ([`completion()`][Self::completion]).
///
/// Handles are cheap to clone. All clones refer to the same job and observe the same outcome.
/// Dropping every handle to a job does not cancel it.
///
/// # Example
///
/// ```rust
/// use jobweb::Scheduler;
///
/// let scheduler = Scheduler::new();
///
/// let download = scheduler.submit(|| Ok(()));
/// let unpack = scheduler.submit_with(0, &[download.clone()], || Ok(()));
///
/// assert!(unpack.wait().is_ok());
/// assert!(download.is_finished());
/// ```
#[derive(Clone, Debug)]
pub struct JobHandle {
    node: Arc<JobNode>,
}

impl JobHandle {
    pub(crate) fn new(node: Arc<JobNode>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &Arc<JobNode> {
        &self.node
    }

    /// The identifier assigned to the job at submission time.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.node.id()
    }

    /// The priority the job was submitted with.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.node.priority()
    }

    /// Whether the job has an outcome yet.
    ///
    /// Jobs that were cancelled by shutdown count as finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.node.is_finished()
    }

    /// Returns the outcome of the job if it has finished, without blocking.
    #[must_use]
    pub fn try_outcome(&self) -> Option<JobResult> {
        self.node.outcome()
    }

    /// Blocks the current thread until the job has finished and returns its outcome.
    ///
    /// Calling this from inside a job body is permitted but occupies the worker thread for the
    /// duration of the wait. If every worker is blocked this way on jobs that are still queued,
    /// the scheduler deadlocks.
    ///
    /// # Errors
    ///
    /// Returns the [`JobError`][crate::JobError] the job finished with.
    pub fn wait(&self) -> JobResult {
        self.node.wait()
    }

    /// Returns a future that resolves to the outcome of the job.
    ///
    /// The future does not borrow the handle and can be sent to another thread.
    pub fn completion(&self) -> impl Future<Output = JobResult> + Send + 'static {
        Arc::clone(&self.node).wait_async()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{BoxError, JobError};

    assert_impl_all!(JobHandle: Send, Sync, Clone);
    assert_impl_all!(JobId: Send, Sync, Copy);

    fn succeed() -> Result<(), BoxError> {
        Ok(())
    }

    fn handle(id: u64, priority: i32) -> JobHandle {
        JobHandle::new(Arc::new(JobNode::new(
            JobId::new(id),
            0,
            priority,
            Box::new(succeed),
            0,
        )))
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId::new(17).to_string(), "job#17");
        assert_eq!(JobId::new(17).get(), 17);
    }

    #[test]
    fn job_ids_order_by_submission() {
        assert!(JobId::new(1) < JobId::new(2));
    }

    #[test]
    fn exposes_submission_attributes() {
        let handle = handle(3, -5);

        assert_eq!(handle.id(), JobId::new(3));
        assert_eq!(handle.priority(), -5);
    }

    #[test]
    fn clones_observe_same_outcome() {
        let handle = handle(0, 0);
        let clone = handle.clone();

        assert!(handle.try_outcome().is_none());
        assert!(!clone.is_finished());

        handle.node().finish(Err(JobError::Abandoned));

        assert!(matches!(clone.try_outcome(), Some(Err(JobError::Abandoned))));
        assert!(matches!(clone.wait(), Err(JobError::Abandoned)));
    }

    #[test]
    fn completion_future_resolves() {
        let handle = handle(0, 0);
        let completion = handle.completion();

        handle.node().finish(Ok(()));

        assert!(block_on(completion).is_ok());
    }
}
