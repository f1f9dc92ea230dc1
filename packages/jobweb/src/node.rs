//! Job nodes: the body of a job plus its place in the dependency graph.

use std::any::{Any, type_name};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use event_listener::{Event, Listener};
use parking_lot::Mutex;

use crate::{BoxError, JobError, JobId, JobResult};

pub(crate) type JobBody = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

/// A submitted job and its dependency bookkeeping.
///
/// The countdown starts at one more than the number of dependencies. The extra count is held by
/// the submitter while it wires the node into its dependencies and is released last, so the node
/// cannot become ready (and be enqueued by a completing dependency) halfway through wiring.
pub(crate) struct JobNode {
    id: JobId,
    scheduler_id: u64,
    priority: i32,

    body: Mutex<Option<JobBody>>,

    remaining_dependencies: AtomicUsize,

    /// Nodes submitted later that named this node as a dependency.
    ///
    /// Becomes `None` when this node finishes. Submitters that find it `None` know the
    /// dependency is already satisfied.
    dependents: Mutex<Option<Vec<Arc<Self>>>>,

    finished: AtomicBool,
    outcome: OnceLock<JobResult>,
    completed: Event,
}

impl fmt::Debug for JobNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.id)
            .field("scheduler_id", &self.scheduler_id)
            .field("priority", &self.priority)
            .field(
                "remaining_dependencies",
                &self.remaining_dependencies.load(Ordering::Relaxed),
            )
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JobNode {
    pub(crate) fn new(
        id: JobId,
        scheduler_id: u64,
        priority: i32,
        body: JobBody,
        dependency_count: usize,
    ) -> Self {
        Self {
            id,
            scheduler_id,
            priority,
            body: Mutex::new(Some(body)),
            remaining_dependencies: AtomicUsize::new(dependency_count.saturating_add(1)),
            dependents: Mutex::new(Some(Vec::new())),
            finished: AtomicBool::new(false),
            outcome: OnceLock::new(),
            completed: Event::new(),
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn scheduler_id(&self) -> u64 {
        self.scheduler_id
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    /// Registers `dependent` to be released when this node finishes.
    ///
    /// Returns `false` if this node has already finished, in which case the caller must treat
    /// the dependency as satisfied.
    pub(crate) fn add_dependent(&self, dependent: &Arc<Self>) -> bool {
        match self.dependents.lock().as_mut() {
            Some(dependents) => {
                dependents.push(Arc::clone(dependent));
                true
            }
            None => false,
        }
    }

    /// Counts down one satisfied dependency (or the submission hold).
    ///
    /// Returns `true` exactly once: for the call that brings the countdown to zero, at which
    /// point the node is ready and the caller is responsible for enqueueing it.
    pub(crate) fn release_dependency(&self) -> bool {
        // AcqRel so that whoever observes zero also observes the side effects of every
        // dependency that finished before it.
        self.remaining_dependencies.fetch_sub(1, Ordering::AcqRel) == 1
    }

    #[cfg(test)]
    pub(crate) fn remaining_dependencies(&self) -> usize {
        self.remaining_dependencies.load(Ordering::Acquire)
    }

    pub(crate) fn take_body(&self) -> Option<JobBody> {
        self.body.lock().take()
    }

    /// Records the outcome, wakes waiters and seals the dependents list.
    ///
    /// Returns the dependents that were registered before sealing, or `None` if the node had
    /// already finished. The dependents lock is released before returning, so the caller is free
    /// to lock ready queues while processing the returned list.
    pub(crate) fn finish(&self, outcome: JobResult) -> Option<Vec<Arc<Self>>> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return None;
        }

        // Cannot fail: the `finished` flag admits a single caller.
        drop(self.outcome.set(outcome));
        self.completed.notify(usize::MAX);

        // The body is dropped here if the job never ran.
        drop(self.take_body());

        let dependents = self.dependents.lock().take();
        Some(dependents.unwrap_or_default())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub(crate) fn outcome(&self) -> Option<JobResult> {
        self.outcome.get().cloned()
    }

    pub(crate) fn wait(&self) -> JobResult {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            let listener = self.completed.listen();

            // Re-check after registering the listener to avoid a lost wakeup.
            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            listener.wait();
        }
    }

    pub(crate) async fn wait_async(self: Arc<Self>) -> JobResult {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            let listener = self.completed.listen();

            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            listener.await;
        }
    }
}

impl Drop for JobNode {
    fn drop(&mut self) {
        // Long dependency chains would otherwise be dropped recursively, one stack frame per
        // link. Unwrap the chain iteratively instead.
        let Some(mut pending) = self.dependents.get_mut().take() else {
            return;
        };

        while let Some(node) = pending.pop() {
            let Ok(mut node) = Arc::try_unwrap(node) else {
                continue;
            };

            if let Some(dependents) = node.dependents.get_mut().take() {
                pending.extend(dependents);
            }
        }
    }
}

/// Runs a job body, converting both returned errors and panics into the job outcome.
pub(crate) fn run_body(body: JobBody) -> JobResult {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(JobError::failed(error)),
        Err(payload) => Err(JobError::Panicked {
            message: format_panic_payload(payload.as_ref()),
        }),
    }
}

fn format_panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    use futures::executor::block_on;

    use super::*;

    fn body(f: impl FnOnce() -> Result<(), BoxError> + Send + 'static) -> JobBody {
        Box::new(f)
    }

    fn node(dependency_count: usize) -> Arc<JobNode> {
        Arc::new(JobNode::new(
            JobId::new(1),
            7,
            0,
            body(|| Ok(())),
            dependency_count,
        ))
    }

    #[test]
    fn countdown_includes_submission_hold() {
        let node = node(2);

        assert_eq!(node.remaining_dependencies(), 3);

        assert!(!node.release_dependency());
        assert!(!node.release_dependency());
        assert!(node.release_dependency());
    }

    #[test]
    fn add_dependent_after_finish_is_rejected() {
        let dependency = node(0);
        let dependent = node(1);

        assert!(dependency.add_dependent(&dependent));

        let released = dependency.finish(Ok(())).unwrap();
        assert_eq!(released.len(), 1);
        assert!(Arc::ptr_eq(released.first().unwrap(), &dependent));

        assert!(!dependency.add_dependent(&dependent));
    }

    #[test]
    fn finish_only_takes_effect_once() {
        let node = node(0);

        assert!(node.finish(Ok(())).is_some());
        assert!(node.finish(Err(JobError::Abandoned)).is_none());

        assert!(matches!(node.outcome(), Some(Ok(()))));
    }

    #[test]
    fn finish_drops_unrun_body() {
        static DROPPED: AtomicU32 = AtomicU32::new(0);

        struct DropCounter;

        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::Relaxed);
            }
        }

        let guard = DropCounter;
        let node = JobNode::new(
            JobId::new(1),
            7,
            0,
            body(move || {
                let _guard = &guard;
                Ok(())
            }),
            0,
        );

        node.finish(Err(JobError::Abandoned));

        assert_eq!(DROPPED.load(Ordering::Relaxed), 1);
        assert!(node.take_body().is_none());
    }

    #[test]
    fn wait_returns_outcome_after_finish() {
        let node = node(0);
        assert!(!node.is_finished());

        node.finish(Err(JobError::Abandoned));

        assert!(node.is_finished());
        assert!(matches!(node.wait(), Err(JobError::Abandoned)));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn wait_blocks_until_finished_on_another_thread() {
        let node = node(0);

        let finisher = thread::spawn({
            let node = Arc::clone(&node);
            move || {
                thread::sleep(Duration::from_millis(20));
                node.finish(Ok(()));
            }
        });

        assert!(node.wait().is_ok());
        finisher.join().unwrap();
    }

    #[test]
    fn wait_async_resolves() {
        let node = node(0);
        node.finish(Ok(()));

        assert!(block_on(Arc::clone(&node).wait_async()).is_ok());
    }

    #[test]
    fn run_body_reports_returned_error() {
        let outcome = run_body(body(|| Err("nope".into())));

        assert!(matches!(outcome, Err(JobError::Failed(e)) if e.to_string() == "nope"));
    }

    #[test]
    fn run_body_captures_panic_message() {
        let outcome = run_body(body(|| panic!("specific message")));

        assert!(matches!(
            outcome,
            Err(JobError::Panicked { message }) if message == "specific message"
        ));
    }

    #[test]
    fn run_body_captures_formatted_panic_message() {
        let value = 42;
        let outcome = run_body(body(move || panic!("value was {value}")));

        assert!(matches!(
            outcome,
            Err(JobError::Panicked { message }) if message == "value was 42"
        ));
    }

    #[test]
    fn dropping_long_chain_does_not_overflow_stack() {
        let root = node(0);
        let mut tail = Arc::clone(&root);

        for _ in 0..100_000 {
            let next = node(1);
            assert!(tail.add_dependent(&next));
            tail = next;
        }

        drop(tail);
        drop(root);
    }
}
