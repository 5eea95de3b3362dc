//! Immutable ordered list of task steps.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::step::Step;
use crate::error::{Error, Result};

/// A named, ordered sequence of [`Step`]s.
///
/// A task is validated once at construction and never mutated afterwards;
/// activating a different task replaces it wholesale. An empty task is valid.
///
/// Lookups never fail: [`get_step`](Task::get_step) returns
/// [`Step::none`] for any index outside `0..len`.
///
/// # Examples
///
/// ```
/// use stepguide::task::{Step, Task};
///
/// let task = Task::new(
///     "make tea",
///     vec![
///         Step::new("boil water", vec!["kettle".to_string()]),
///         Step::new("steep tea", vec!["cup".to_string(), "teabag".to_string()]),
///     ],
/// )
/// .unwrap();
///
/// assert_eq!(task.len(), 2);
/// assert_eq!(task.get_step(1).action(), "steep tea");
/// assert!(task.get_step(-1).is_none());
/// assert!(task.get_step(2).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    name: String,
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct RawTask {
    name: String,
    #[serde(default)]
    steps: Vec<Step>,
}

impl TryFrom<RawTask> for Task {
    type Error = Error;

    fn try_from(raw: RawTask) -> Result<Self> {
        Task::new(raw.name, raw.steps)
    }
}

impl Task {
    /// Create a task, validating every step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if any step has an empty action. Focus
    /// object lists are taken as given, duplicates and empty names included.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        if let Some(index) = steps.iter().position(|step| step.action().is_empty()) {
            return Err(Error::validation(format!(
                "step {index} has an empty action"
            )));
        }

        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    /// Parse a task from its JSON form: `{"name": .., "steps": [{"action": .., "focus_objects": [..]}]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<RawTask>(json)
            .map_err(|e| Error::validation(format!("invalid task document: {e}")))
            .and_then(Task::try_from)
    }

    /// Load a task from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
        Self::from_json(&contents)
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the task has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step at `index`, or the sentinel step if out of range.
    pub fn get_step(&self, index: i64) -> Step {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.steps.get(i))
            .cloned()
            .unwrap_or_else(Step::none)
    }
}
