//! State shared between the scheduler, its submitters and its worker threads.

use std::any::type_name;
use std::fmt;
use std::mem;
use std::num::NonZero;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::Duration;

use event_listener::{Event, Listener};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::metrics::{
    EXECUTION_TIME_MS, JOBS_ABANDONED, JOBS_FAILED, JOBS_SUBMITTED, SCHEDULING_DELAY_MS,
};
use crate::{
    JobBody, JobError, JobHandle, JobId, JobNode, JobResult, ReadyJob, ReadyQueueSet,
    SchedulerStats, current_worker_scheduler, run_body, worker_loop,
};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct SchedulerInner {
    id: u64,
    pub(crate) queues: ReadyQueueSet,
    next_job_id: AtomicU64,

    /// Jobs that are queued or executing. Incremented before a job is pushed to a ready queue
    /// and decremented after its completion cascade has enqueued any dependents, so it only
    /// reaches zero when no work is left that could make more work ready.
    outstanding: AtomicUsize,

    /// Jobs that are executing right now.
    active: AtomicUsize,

    stopping: AtomicBool,

    /// Set by the first `shutdown()` call once workers are joined and leftovers resolved.
    shut_down: AtomicBool,

    /// Notified once per job made ready and for all listeners on shutdown.
    pub(crate) wake: Event,

    /// Notified whenever `outstanding` drops to zero.
    quiescent: Event,

    /// Notified when `shut_down` is set.
    shutdown_complete: Event,

    pub(crate) idle_timeout: Duration,

    worker_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl fmt::Debug for SchedulerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.id)
            .field("worker_count", &self.queues.len())
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SchedulerInner {
    pub(crate) fn new(worker_count: NonZero<usize>, idle_timeout: Duration) -> Self {
        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            queues: ReadyQueueSet::new(worker_count),
            next_job_id: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            wake: Event::new(),
            quiescent: Event::new(),
            shutdown_complete: Event::new(),
            idle_timeout,
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Creates the shared state and starts one worker thread per ready queue.
    pub(crate) fn start(
        worker_count: NonZero<usize>,
        idle_timeout: Duration,
        thread_name_prefix: &str,
    ) -> Arc<Self> {
        let inner = Arc::new(Self::new(worker_count, idle_timeout));
        let scheduler_id = inner.id;

        let handles = (0..worker_count.get())
            .map(|worker_index| {
                let inner = Arc::clone(&inner);

                thread::Builder::new()
                    .name(format!("{thread_name_prefix}-{worker_index}"))
                    .spawn(move || {
                        debug!(scheduler_id, worker_index, "worker thread started");
                        worker_loop(&inner, worker_index);
                        debug!(scheduler_id, worker_index, "worker thread exiting");
                    })
                    .expect(
                        "failed to spawn worker thread: thread spawning failure is not supported",
                    )
            })
            .collect::<Vec<_>>();

        *inner.worker_handles.lock() = handles;

        debug!(
            scheduler_id,
            worker_count = worker_count.get(),
            "scheduler started"
        );

        inner
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn worker_count(&self) -> NonZero<usize> {
        NonZero::new(self.queues.len()).expect("guarded by ReadyQueueSet never being empty")
    }

    pub(crate) fn is_stopping(&self) -> bool {
        // Acquire pairs with the Release half of the swap in `shutdown()`.
        self.stopping.load(Ordering::Acquire)
    }

    /// Panics if the handle was issued by a different scheduler.
    pub(crate) fn assert_owned(&self, handle: &JobHandle) {
        assert!(
            handle.node().scheduler_id() == self.id,
            "{} belongs to a different scheduler than the one it was used with",
            handle.id()
        );
    }

    pub(crate) fn submit(
        &self,
        priority: i32,
        dependencies: &[JobHandle],
        body: JobBody,
    ) -> JobHandle {
        for dependency in dependencies {
            self.assert_owned(dependency);
        }

        let id = JobId::new(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(JobNode::new(
            id,
            self.id,
            priority,
            body,
            dependencies.len(),
        ));

        JOBS_SUBMITTED.with(|e| e.observe_once());

        if self.is_stopping() {
            trace!(scheduler_id = self.id, %id, "job submitted after shutdown");
            node.finish(Err(JobError::SubmittedAfterShutdown));
            return JobHandle::new(node);
        }

        for dependency in dependencies {
            if !dependency.node().add_dependent(&node) {
                // The dependency finished before we could register. It counts as satisfied.
                let ready = node.release_dependency();
                debug_assert!(!ready, "the submission hold keeps the countdown above zero");
            }
        }

        trace!(
            scheduler_id = self.id,
            %id,
            priority,
            dependencies = dependencies.len(),
            "job submitted"
        );

        // Release the submission hold. If every dependency has already finished (or there were
        // none), the job is ready now.
        if node.release_dependency() {
            self.enqueue(Arc::clone(&node));
        }

        JobHandle::new(node)
    }

    #[cfg(test)]
    pub(crate) fn new_node(
        &self,
        priority: i32,
        dependency_count: usize,
        body: JobBody,
    ) -> Arc<JobNode> {
        let id = JobId::new(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(JobNode::new(id, self.id, priority, body, dependency_count))
    }

    /// Places a ready node on a specific queue, bypassing random placement.
    #[cfg(test)]
    pub(crate) fn enqueue_to(&self, queue_index: usize, node: Arc<JobNode>) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        if let Err(job) = self.queues.push_to(queue_index, ReadyJob::new(node)) {
            self.abandon(job.into_node());
            self.release_outstanding();
        }
    }

    /// Places a ready node on a random queue and wakes a worker.
    ///
    /// Once shutdown has begun, the node is abandoned instead.
    pub(crate) fn enqueue(&self, node: Arc<JobNode>) {
        if self.is_stopping() {
            self.abandon(node);
            return;
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);

        match self.queues.push_random(ReadyJob::new(node)) {
            Ok(queue_index) => {
                trace!(scheduler_id = self.id, queue_index, "job ready");
                self.wake.notify(1);
            }
            Err(job) => {
                // Shutdown closed the queues after we checked the flag.
                self.abandon(job.into_node());
                self.release_outstanding();
            }
        }
    }

    /// Runs a job taken from a ready queue and performs its completion cascade.
    pub(crate) fn execute(&self, job: ReadyJob) {
        SCHEDULING_DELAY_MS.with(|e| e.observe_millis(job.ready_at().elapsed()));

        let node = job.into_node();

        let Some(body) = node.take_body() else {
            // Already resolved through another path. Nothing to run and nothing to report.
            debug_assert!(node.is_finished());
            self.release_outstanding();
            return;
        };

        self.active.fetch_add(1, Ordering::AcqRel);

        // No locks are held while the body runs, so the body may submit more jobs.
        let outcome = EXECUTION_TIME_MS.with(|e| e.observe_duration_millis(|| run_body(body)));

        if let Err(error) = &outcome {
            JOBS_FAILED.with(|e| e.observe_once());
            warn!(scheduler_id = self.id, job_id = %node.id(), %error, "job failed");
        } else {
            trace!(scheduler_id = self.id, job_id = %node.id(), "job completed");
        }

        self.complete(&node, outcome);

        self.active.fetch_sub(1, Ordering::AcqRel);
        self.release_outstanding();
    }

    /// Fulfills the completion signal and makes ready every dependent whose last dependency
    /// this was. Dependents of a failed job still run.
    fn complete(&self, node: &JobNode, outcome: JobResult) {
        let Some(dependents) = node.finish(outcome) else {
            return;
        };

        for dependent in dependents {
            if dependent.release_dependency() {
                self.enqueue(dependent);
            }
        }
    }

    /// Resolves the node as abandoned, together with every dependent that can now never run.
    fn abandon(&self, node: Arc<JobNode>) {
        let mut pending = vec![node];
        let mut abandoned: usize = 0;

        while let Some(node) = pending.pop() {
            if let Some(dependents) = node.finish(Err(JobError::Abandoned)) {
                trace!(scheduler_id = self.id, job_id = %node.id(), "job abandoned");
                abandoned = abandoned.saturating_add(1);
                pending.extend(dependents);
            }
        }

        if abandoned > 0 {
            JOBS_ABANDONED.with(|e| e.batch(abandoned).observe_once());
        }
    }

    fn release_outstanding(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.quiescent.notify(usize::MAX);
        }
    }

    fn is_quiescent(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0 && self.queues.all_empty()
    }

    pub(crate) fn wait_all(&self) {
        assert!(
            current_worker_scheduler() != Some(self.id),
            "wait_all() cannot be called from a job running on the same scheduler because the \
             calling job itself is outstanding work"
        );

        loop {
            if self.is_quiescent() {
                return;
            }

            let listener = self.quiescent.listen();

            // Re-check after registering the listener to avoid a lost wakeup.
            if self.is_quiescent() {
                return;
            }

            listener.wait();
        }
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats::new(
            self.queues.queued_len(),
            self.active.load(Ordering::Acquire),
            self.worker_count(),
        )
    }

    /// Stops the workers and resolves every job that did not get to run as abandoned.
    ///
    /// Only the first call does the work. Later calls wait for it to finish, unless they come
    /// from a job on this scheduler, which the first call may be waiting for. A job that is
    /// executing when shutdown begins runs to completion first.
    #[cfg_attr(test, mutants::skip)] // Mutations here mostly hang the test suite.
    pub(crate) fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            if current_worker_scheduler() != Some(self.id) {
                self.wait_for_shutdown();
            }

            return;
        }

        debug!(scheduler_id = self.id, "scheduler shutting down");

        self.wake.notify(usize::MAX);

        let handles = mem::take(&mut *self.worker_handles.lock());
        let current_thread = thread::current().id();
        let mut worker_panic = None;

        for handle in handles {
            // A job body may shut down its own scheduler. That worker exits by itself once the
            // body returns, so there is nothing to join.
            if handle.thread().id() == current_thread {
                continue;
            }

            if let Err(payload) = handle.join() {
                worker_panic.get_or_insert(payload);
            }
        }

        let leftovers = self.queues.close();
        let leftover_count = leftovers.len();

        for job in leftovers {
            self.abandon(job.into_node());
            self.release_outstanding();
        }

        debug!(
            scheduler_id = self.id,
            abandoned_ready_jobs = leftover_count,
            "scheduler shut down"
        );

        self.shut_down.store(true, Ordering::Release);
        self.shutdown_complete.notify(usize::MAX);

        if let Some(payload) = worker_panic {
            // Worker threads capture job panics and should never panic themselves. If one did,
            // the scheduler infrastructure is broken and we propagate the failure, after
            // resolving everything so that no waiter is left hanging.
            panic::resume_unwind(payload);
        }
    }

    fn wait_for_shutdown(&self) {
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return;
            }

            let listener = self.shutdown_complete.listen();

            // Re-check after registering the listener to avoid a lost wakeup.
            if self.shut_down.load(Ordering::Acquire) {
                return;
            }

            listener.wait();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicU32;

    use new_zealand::nz;

    use super::*;
    use crate::BoxError;

    const IDLE: Duration = Duration::from_millis(1);

    fn body(f: impl FnOnce() -> Result<(), BoxError> + Send + 'static) -> JobBody {
        Box::new(f)
    }

    fn counting(counter: &Arc<AtomicU32>) -> JobBody {
        let counter = Arc::clone(counter);
        body(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    /// Executes every queued job on the calling thread, as a worker would.
    fn drain(inner: &SchedulerInner) {
        while let Some(job) = (0..inner.queues.len()).find_map(|index| inner.queues.pop_local(index))
        {
            inner.execute(job);
        }
    }

    fn new_counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[test]
    fn independent_job_is_queued_immediately() {
        let inner = SchedulerInner::new(nz!(2), IDLE);
        let counter = new_counter();

        let handle = inner.submit(0, &[], counting(&counter));

        assert_eq!(inner.queues.queued_len(), 1);
        assert!(!handle.is_finished());

        drain(&inner);

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(matches!(handle.try_outcome(), Some(Ok(()))));
        assert!(inner.is_quiescent());
    }

    #[test]
    fn dependent_stays_dormant_until_dependency_completes() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        let first = inner.submit(0, &[], counting(&counter));
        let second = inner.submit(0, &[first.clone()], counting(&counter));

        assert_eq!(inner.queues.queued_len(), 1);

        let job = inner.queues.pop_local(0).unwrap();
        assert_eq!(job.node().id(), first.id());
        inner.execute(job);

        // Completion of the first job made the second one ready.
        assert_eq!(inner.queues.queued_len(), 1);
        assert!(!second.is_finished());

        drain(&inner);
        assert!(second.is_finished());
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn dependency_that_already_finished_counts_as_satisfied() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        let first = inner.submit(0, &[], counting(&counter));
        drain(&inner);

        let second = inner.submit(0, &[first], counting(&counter));
        assert_eq!(inner.queues.queued_len(), 1);

        drain(&inner);
        assert!(second.is_finished());
    }

    #[test]
    fn dependents_of_failed_job_still_run() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        let failing = inner.submit(0, &[], body(|| Err("broken".into())));
        let dependent = inner.submit(0, &[failing.clone()], counting(&counter));

        drain(&inner);

        assert!(matches!(failing.try_outcome(), Some(Err(JobError::Failed(_)))));
        assert!(matches!(dependent.try_outcome(), Some(Ok(()))));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_job_is_captured() {
        let inner = SchedulerInner::new(nz!(1), IDLE);

        let handle = inner.submit(0, &[], body(|| panic!("kaboom")));
        drain(&inner);

        assert!(matches!(
            handle.try_outcome(),
            Some(Err(JobError::Panicked { message })) if message == "kaboom"
        ));
        assert!(inner.is_quiescent());
    }

    #[test]
    fn submit_after_shutdown_is_cancelled() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        inner.shutdown();

        let handle = inner.submit(0, &[], counting(&counter));

        assert!(matches!(
            handle.try_outcome(),
            Some(Err(JobError::SubmittedAfterShutdown))
        ));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(inner.is_quiescent());
    }

    #[test]
    fn shutdown_abandons_queued_and_dormant_jobs() {
        let inner = SchedulerInner::new(nz!(2), IDLE);
        let counter = new_counter();

        let root = inner.submit(0, &[], counting(&counter));
        let middle = inner.submit(0, &[root.clone()], counting(&counter));
        let leaf = inner.submit(0, &[middle.clone(), root.clone()], counting(&counter));

        inner.shutdown();

        for handle in [&root, &middle, &leaf] {
            assert!(matches!(handle.try_outcome(), Some(Err(JobError::Abandoned))));
        }

        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(inner.is_quiescent());
    }

    #[test]
    fn enqueue_after_shutdown_abandons() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        let first = inner.submit(0, &[], counting(&counter));
        let second = inner.submit(0, &[first.clone()], counting(&counter));

        // Simulate a job that was already running when shutdown began.
        let running = inner.queues.pop_local(0).unwrap();
        inner.shutdown();
        inner.execute(running);

        assert!(matches!(first.try_outcome(), Some(Ok(()))));
        assert!(matches!(second.try_outcome(), Some(Err(JobError::Abandoned))));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(inner.is_quiescent());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let inner = SchedulerInner::new(nz!(1), IDLE);

        inner.shutdown();
        inner.shutdown();

        assert!(inner.is_stopping());
    }

    #[test]
    #[should_panic]
    fn foreign_dependency_is_rejected() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let other = SchedulerInner::new(nz!(1), IDLE);

        let foreign = other.submit(0, &[], body(|| Ok(())));
        inner.submit(0, &[foreign], body(|| Ok(())));
    }

    #[test]
    fn job_ids_are_sequential() {
        let inner = SchedulerInner::new(nz!(1), IDLE);

        let first = inner.submit(0, &[], body(|| Ok(())));
        let second = inner.submit(0, &[], body(|| Ok(())));

        assert_eq!(first.id().get(), 0);
        assert_eq!(second.id().get(), 1);
    }

    #[test]
    fn stats_report_queued_jobs() {
        let inner = SchedulerInner::new(nz!(3), IDLE);

        for _ in 0..5 {
            inner.submit(0, &[], body(|| Ok(())));
        }

        let stats = inner.stats();
        assert_eq!(stats.queued(), 5);
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.workers().get(), 3);

        drain(&inner);
        assert_eq!(inner.stats().queued(), 0);
    }

    #[test]
    fn already_resolved_node_in_queue_is_skipped() {
        let inner = SchedulerInner::new(nz!(1), IDLE);
        let counter = new_counter();

        let node = inner.new_node(0, 0, counting(&counter));
        let handle = JobHandle::new(Arc::clone(&node));

        drop(node.finish(Err(JobError::Abandoned)));
        inner.enqueue_to(0, node);
        drain(&inner);

        // The recorded outcome stands and the skipped entry no longer counts as outstanding.
        assert!(matches!(handle.try_outcome(), Some(Err(JobError::Abandoned))));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(inner.stats().active(), 0);
        assert!(inner.is_quiescent());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn later_shutdown_call_from_other_thread_returns_once_complete() {
        let inner = Arc::new(SchedulerInner::new(nz!(1), IDLE));

        inner.shutdown();

        let other = thread::spawn({
            let inner = Arc::clone(&inner);
            move || inner.shutdown()
        });

        other.join().unwrap();
        assert!(inner.shut_down.load(Ordering::Acquire));
    }

    #[test]
    fn wait_all_without_jobs_returns() {
        let inner = SchedulerInner::new(nz!(1), IDLE);

        inner.wait_all();
    }
}
