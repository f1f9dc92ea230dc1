#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A work-stealing job scheduler that runs jobs in dependency order.
//!
//! Jobs are closures submitted to a [`Scheduler`], optionally with a priority and a list of
//! jobs they depend on. A job becomes ready once every job it depends on has finished and is
//! then executed by one of a fixed set of worker threads.
//!
//! # Quick start
//!
//! ```rust
//! use jobweb::Scheduler;
//!
//! let scheduler = Scheduler::new();
//!
//! let fetch = scheduler.submit(|| {
//!     println!("fetching");
//!     Ok(())
//! });
//!
//! let parse = scheduler.submit_with(0, &[fetch.clone()], || {
//!     println!("parsing after fetching");
//!     Ok(())
//! });
//!
//! assert!(scheduler.wait_for(&parse).is_ok());
//! scheduler.wait_all();
//! ```
//!
//! # Dependencies
//!
//! Dependencies are named by [`JobHandle`] at submission time and cannot be changed afterwards.
//! Because a job can only depend on jobs that already exist when it is submitted, cycles cannot
//! be expressed. A dependency that has already finished counts as satisfied.
//!
//! # Priorities
//!
//! Every job carries an `i32` priority, 0 by default. Each worker runs the highest priority job
//! from its own queue first, with equal priorities taken in submission order. Priority is a
//! per-queue hint, not a global ordering: random placement and work stealing mean a lower
//! priority job on one worker may run before a higher priority job on another.
//!
//! # Failures
//!
//! A job body returns `Result<(), BoxError>`. An error or a panic inside the body is captured as
//! the job's [`JobError`] and does not affect other jobs, the worker thread or the scheduler.
//! Dependents of a failed job still run.
//!
//! # Shutdown
//!
//! Dropping the [`Scheduler`] shuts it down. Jobs that are executing finish first; jobs that
//! never got to run resolve as [`JobError::Abandoned`], and every later submission resolves as
//! [`JobError::SubmittedAfterShutdown`] without running.
//!
//! # Async
//!
//! [`JobHandle::completion()`] returns a future that resolves with the job's outcome, allowing
//! async code to wait for jobs without blocking a thread.
//!
//! # Metrics
//!
//! The scheduler reports event counts and timing histograms via the `nm` crate, with the names
//! prefixed by `jobweb_`.

mod engine;
mod error;
mod handle;
mod metrics;
mod node;
mod queue;
mod scheduler;
mod submitter;
mod worker;

pub(crate) use engine::*;
pub use error::*;
pub use handle::*;
pub(crate) use node::*;
pub(crate) use queue::*;
pub use scheduler::*;
pub use submitter::*;
pub(crate) use worker::*;
