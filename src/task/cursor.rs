//! Progress cursor over the active task.

use std::sync::Arc;

use super::catalog::Task;
use super::step::Step;

/// Result of [`TaskCursor::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The cursor moved onto this step.
    Step(Step),
    /// The cursor moved past the last step; the task is complete.
    Finished,
}

/// Tracks the current step index into a shared [`Task`].
///
/// The index is unconstrained: it may be negative or past the end, in which
/// case step lookups return the sentinel step. It only ever changes through
/// [`advance`](TaskCursor::advance).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use stepguide::task::{Advance, Step, Task, TaskCursor};
///
/// let task = Arc::new(
///     Task::new("t", vec![
///         Step::new("first", vec![]),
///         Step::new("second", vec![]),
///     ])
///     .unwrap(),
/// );
/// let mut cursor = TaskCursor::new(task, 0);
/// assert_eq!(cursor.current_step().action(), "first");
/// assert!(cursor.previous_step().is_none());
///
/// assert_eq!(cursor.advance(), Advance::Step(Step::new("second", vec![])));
/// assert_eq!(cursor.advance(), Advance::Finished);
/// ```
#[derive(Debug, Clone)]
pub struct TaskCursor {
    task: Arc<Task>,
    index: i64,
}

impl TaskCursor {
    /// Create a cursor at `index`.
    pub fn new(task: Arc<Task>, index: i64) -> Self {
        Self { task, index }
    }

    /// The task being tracked.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// The current index.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// The step at the current index.
    pub fn current_step(&self) -> Step {
        self.task.get_step(self.index)
    }

    /// The step before the current one.
    pub fn previous_step(&self) -> Step {
        self.task.get_step(self.index.saturating_sub(1))
    }

    /// The step after the current one.
    pub fn next_step(&self) -> Step {
        self.task.get_step(self.index.saturating_add(1))
    }

    /// Move to the next step.
    ///
    /// Returns [`Advance::Finished`] once the index reaches or passes the
    /// number of steps; callers must check before treating the result as an
    /// active step.
    pub fn advance(&mut self) -> Advance {
        self.index = self.index.saturating_add(1);
        if self.is_finished() {
            Advance::Finished
        } else {
            Advance::Step(self.current_step())
        }
    }

    /// Returns `true` once the index is at or past the end of the task.
    pub fn is_finished(&self) -> bool {
        usize::try_from(self.index).is_ok_and(|i| i >= self.task.len())
    }
}
