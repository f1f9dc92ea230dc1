//! Per-worker ready queues.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::iter;
use std::num::NonZero;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;

use crate::JobNode;

/// A job whose dependencies are all satisfied, waiting for a worker.
#[derive(Debug)]
pub(crate) struct ReadyJob {
    node: Arc<JobNode>,
    ready_at: Instant,
}

impl ReadyJob {
    pub(crate) fn new(node: Arc<JobNode>) -> Self {
        Self {
            node,
            ready_at: Instant::now(),
        }
    }

    pub(crate) fn node(&self) -> &Arc<JobNode> {
        &self.node
    }

    pub(crate) fn ready_at(&self) -> Instant {
        self.ready_at
    }

    pub(crate) fn into_node(self) -> Arc<JobNode> {
        self.node
    }
}

// Higher priority first. Among equal priorities the earlier submission wins, which keeps each
// individual queue FIFO for jobs submitted with the default priority.
impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node
            .priority()
            .cmp(&other.node.priority())
            .then_with(|| other.node.id().cmp(&self.node.id()))
    }
}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyJob {}

#[derive(Debug, Default)]
struct ReadyQueue {
    jobs: BinaryHeap<ReadyJob>,

    /// Once closed, the queue accepts no more jobs. Set when the scheduler shuts down.
    closed: bool,
}

/// One independently locked priority queue per worker.
///
/// Only a single queue lock is ever held at a time.
#[derive(Debug)]
pub(crate) struct ReadyQueueSet {
    queues: Box<[Mutex<ReadyQueue>]>,
}

impl ReadyQueueSet {
    pub(crate) fn new(count: NonZero<usize>) -> Self {
        let queues = iter::repeat_with(Mutex::default)
            .take(count.get())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self { queues }
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    /// Pushes the job onto a uniformly randomly selected queue.
    ///
    /// Returns the index of the queue that accepted the job, or gives the job back if the
    /// queue set has been closed.
    pub(crate) fn push_random(&self, job: ReadyJob) -> Result<usize, ReadyJob> {
        let index = rand::rng().random_range(0..self.queues.len());
        self.push_to(index, job).map(|()| index)
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "callers only pass indexes below len(), enforced by the type invariant"
    )]
    pub(crate) fn push_to(&self, index: usize, job: ReadyJob) -> Result<(), ReadyJob> {
        let mut queue = self.queues[index].lock();

        if queue.closed {
            return Err(job);
        }

        queue.jobs.push(job);
        Ok(())
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "worker indexes are below len() by construction"
    )]
    pub(crate) fn pop_local(&self, index: usize) -> Option<ReadyJob> {
        self.queues[index].lock().jobs.pop()
    }

    /// Takes the top job from the first non-empty sibling of `thief`.
    ///
    /// Siblings are visited in a fixed order starting from the queue after the thief's own,
    /// wrapping around. Returns the job and the index of the queue it came from.
    pub(crate) fn steal(&self, thief: usize) -> Option<(usize, ReadyJob)> {
        let count = self.queues.len();

        (1..count)
            .filter_map(|offset| thief.wrapping_add(offset).checked_rem(count))
            .find_map(|index| {
                let job = self.queues.get(index)?.lock().jobs.pop()?;
                Some((index, job))
            })
    }

    /// Snapshot check of every queue, one lock at a time. Not atomic across queues.
    pub(crate) fn all_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.lock().jobs.is_empty())
    }

    /// Snapshot of the total number of queued jobs, one lock at a time.
    pub(crate) fn queued_len(&self) -> usize {
        self.queues.iter().map(|queue| queue.lock().jobs.len()).sum()
    }

    /// Closes every queue against further pushes and returns the jobs still queued.
    pub(crate) fn close(&self) -> Vec<ReadyJob> {
        self.queues
            .iter()
            .flat_map(|queue| {
                let mut queue = queue.lock();
                queue.closed = true;
                queue.jobs.drain().collect::<Vec<_>>()
            })
            .collect()
    }
}
