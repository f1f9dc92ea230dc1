use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// What happened to a labeled piece of work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Step {
    /// The work began executing.
    Started,
    /// The work returned.
    Finished,
}

/// Records the global order in which labeled jobs start and finish, so tests can assert
/// ordering guarantees after the fact.
///
/// Cloning yields another handle to the same log.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<(String, Step)>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a start event for `label`.
    pub fn started(&self, label: impl Into<String>) {
        self.entries.lock().push((label.into(), Step::Started));
    }

    /// Appends a finish event for `label`.
    pub fn finished(&self, label: impl Into<String>) {
        self.entries.lock().push((label.into(), Step::Finished));
    }

    /// Records the start of `label`, runs `f` and records its end.
    pub fn record<R>(&self, label: &str, f: impl FnOnce() -> R) -> R {
        self.started(label);
        let result = f();
        self.finished(label);
        result
    }

    /// Position of the event in the log, if it was recorded.
    #[must_use]
    pub fn position(&self, label: &str, step: Step) -> Option<usize> {
        self.entries
            .lock()
            .iter()
            .position(|(l, s)| l == label && *s == step)
    }

    /// Whether `earlier` finished before `later` started.
    ///
    /// # Panics
    ///
    /// Panics if either event was never recorded.
    #[must_use]
    pub fn finished_before_started(&self, earlier: &str, later: &str) -> bool {
        let finished = self
            .position(earlier, Step::Finished)
            .unwrap_or_else(|| panic!("{earlier} never finished"));
        let started = self
            .position(later, Step::Started)
            .unwrap_or_else(|| panic!("{later} never started"));

        finished < started
    }

    /// How many times `label` started.
    #[must_use]
    pub fn start_count(&self, label: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(l, s)| l == label && *s == Step::Started)
            .count()
    }

    /// Labels in the order they started.
    #[must_use]
    pub fn start_order(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, s)| *s == Step::Started)
            .map(|(l, _)| l.clone())
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("entries", &*self.entries.lock())
            .finish()
    }
}
