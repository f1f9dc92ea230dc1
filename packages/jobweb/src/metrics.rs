//! Metrics for the jobweb scheduler.
//!
//! The metrics use per-thread event instances to minimize contention. Collect them with
//! `nm::Report::collect()`.

use nm::{Event, Magnitude};

/// Histogram buckets for scheduling delay in milliseconds.
///
/// The scheduling delay is the time between a job becoming ready (all dependencies satisfied)
/// and a worker starting to execute it.
const SCHEDULING_DELAY_MS_BUCKETS: &[Magnitude] = &[0, 1, 2, 5, 10, 20, 50, 100, 200, 500, 1000];

/// Histogram buckets for job execution time in milliseconds.
const EXECUTION_TIME_MS_BUCKETS: &[Magnitude] = &[0, 1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000];

thread_local! {
    pub(crate) static JOBS_SUBMITTED: Event = Event::builder()
        .name("jobweb_jobs_submitted")
        .build();

    /// Jobs a worker took from a sibling's queue because its own queue was empty.
    pub(crate) static JOBS_STOLEN: Event = Event::builder()
        .name("jobweb_jobs_stolen")
        .build();

    /// Jobs whose body returned an error or panicked.
    pub(crate) static JOBS_FAILED: Event = Event::builder()
        .name("jobweb_jobs_failed")
        .build();

    /// Jobs resolved without running because the scheduler shut down.
    pub(crate) static JOBS_ABANDONED: Event = Event::builder()
        .name("jobweb_jobs_abandoned")
        .build();

    pub(crate) static SCHEDULING_DELAY_MS: Event = Event::builder()
        .name("jobweb_scheduling_delay_ms")
        .histogram(SCHEDULING_DELAY_MS_BUCKETS)
        .build();

    pub(crate) static EXECUTION_TIME_MS: Event = Event::builder()
        .name("jobweb_execution_time_ms")
        .histogram(EXECUTION_TIME_MS_BUCKETS)
        .build();
}
