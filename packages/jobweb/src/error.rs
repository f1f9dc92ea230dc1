use std::error::Error;
use std::sync::Arc;

/// The error type that job bodies return to report a failure.
///
/// Any error type that implements [`std::error::Error`] converts into this with `?` or
/// `.into()`, as do `&str` and `String`.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The outcome of a job, as delivered through its [`JobHandle`][crate::JobHandle].
pub type JobResult = Result<(), JobError>;

/// Reasons why a job did not complete successfully.
///
/// The error is only ever reported through the completion signal of the job it belongs to.
/// Scheduler-level operations such as [`Scheduler::wait_all()`][crate::Scheduler::wait_all]
/// never fail because a job failed.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum JobError {
    /// The job body ran and returned an error.
    #[error("job failed: {0}")]
    Failed(#[source] Arc<dyn Error + Send + Sync + 'static>),

    /// The job body panicked. The panic was captured at the worker boundary.
    #[error("job panicked: {message}")]
    Panicked {
        /// The panic message, if the payload was a string. Otherwise a placeholder.
        message: String,
    },

    /// The job was submitted after the scheduler started shutting down, so it never ran.
    #[error("job was submitted after the scheduler started shutting down")]
    SubmittedAfterShutdown,

    /// The job was waiting in a ready queue or on its dependencies when the scheduler shut down,
    /// so it never ran.
    #[error("job was abandoned because the scheduler shut down before it could run")]
    Abandoned,
}

impl JobError {
    /// Whether the job never ran because of scheduler shutdown, as opposed to having run
    /// and failed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::SubmittedAfterShutdown | Self::Abandoned)
    }

    pub(crate) fn failed(error: BoxError) -> Self {
        Self::Failed(Arc::from(error))
    }
}
