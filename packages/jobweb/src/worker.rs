//! Worker thread logic: find a ready job, run it, repeat.

use std::cell::Cell;

use event_listener::Listener;
use tracing::trace;

use crate::SchedulerInner;
use crate::metrics::JOBS_STOLEN;

thread_local! {
    /// Identifies the scheduler whose worker is running on the current thread, if any.
    static WORKER_OF: Cell<Option<u64>> = const { Cell::new(None) };
}

pub(crate) fn current_worker_scheduler() -> Option<u64> {
    WORKER_OF.with(Cell::get)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IterationResult {
    ExecutedLocal,
    ExecutedStolen,
    Shutdown,
    WaitingForWork,
}

pub(crate) struct WorkerCore<'a> {
    inner: &'a SchedulerInner,
    index: usize,
}

impl<'a> WorkerCore<'a> {
    pub(crate) fn new(inner: &'a SchedulerInner, index: usize) -> Self {
        Self { inner, index }
    }

    pub(crate) fn run_one_iteration(&self) -> IterationResult {
        if self.inner.is_stopping() {
            return IterationResult::Shutdown;
        }

        if let Some(job) = self.inner.queues.pop_local(self.index) {
            self.inner.execute(job);
            return IterationResult::ExecutedLocal;
        }

        if let Some((victim, job)) = self.inner.queues.steal(self.index) {
            JOBS_STOLEN.with(|e| e.observe_once());
            trace!(
                scheduler_id = self.inner.id(),
                worker_index = self.index,
                victim,
                job_id = %job.node().id(),
                "stole job"
            );

            self.inner.execute(job);
            return IterationResult::ExecutedStolen;
        }

        IterationResult::WaitingForWork
    }
}

#[cfg_attr(test, mutants::skip)] // Mutations here hang the worker threads.
pub(crate) fn worker_loop(inner: &SchedulerInner, index: usize) {
    WORKER_OF.with(|w| w.set(Some(inner.id())));

    let core = WorkerCore::new(inner, index);

    loop {
        match core.run_one_iteration() {
            IterationResult::ExecutedLocal | IterationResult::ExecutedStolen => {}
            IterationResult::Shutdown => break,
            IterationResult::WaitingForWork => {
                let listener = inner.wake.listen();

                // Re-check after registering the listener to avoid lost wakeups.
                if inner.is_stopping() || !inner.queues.all_empty() {
                    continue;
                }

                // One notification per ready job is not a guarantee that every idle worker gets
                // woken, so the wait is bounded and the worker looks around again regardless.
                if listener.wait_timeout(inner.idle_timeout).is_none() {
                    trace!(
                        scheduler_id = inner.id(),
                        worker_index = index,
                        "idle wait timed out"
                    );
                }
            }
        }
    }

    WORKER_OF.with(|w| w.set(None));
}
