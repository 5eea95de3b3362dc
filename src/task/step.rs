//! A single unit of a physical procedure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action reported for the sentinel step returned outside a task's bounds.
pub const NONE_ACTION: &str = "none";

/// One step of a task: an action plus the objects it involves.
///
/// Steps are plain values with no identity beyond their position in a
/// [`Task`](super::Task). Focus objects may repeat and may be empty.
///
/// # Examples
///
/// ```
/// use stepguide::task::Step;
///
/// let step = Step::new("pour water", vec!["cup".to_string(), "bottle".to_string()]);
/// assert_eq!(step.action(), "pour water");
/// assert_eq!(step.focus_objects().len(), 2);
/// assert!(!step.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    action: String,
    focus_objects: Vec<String>,
}

impl Step {
    /// Create a step. Validation happens when the step joins a task.
    pub fn new(action: impl Into<String>, focus_objects: Vec<String>) -> Self {
        Self {
            action: action.into(),
            focus_objects,
        }
    }

    /// The "no step" sentinel: action `"none"`, no focus objects.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepguide::task::Step;
    ///
    /// let none = Step::none();
    /// assert_eq!(none.action(), "none");
    /// assert!(none.focus_objects().is_empty());
    /// assert!(none.is_none());
    /// ```
    pub fn none() -> Self {
        Self {
            action: NONE_ACTION.to_string(),
            focus_objects: Vec::new(),
        }
    }

    /// Returns `true` if this is the sentinel step.
    pub fn is_none(&self) -> bool {
        self.action == NONE_ACTION
    }

    /// The action to perform.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The objects involved in the action, in declaration order.
    pub fn focus_objects(&self) -> &[String] {
        &self.focus_objects
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step(action='{}', focus_objects=[{}])",
            self.action,
            self.focus_objects.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_objects() {
        let step = Step::new("pick up cup", vec!["cup".into()]);
        assert_eq!(
            step.to_string(),
            "Step(action='pick up cup', focus_objects=[cup])"
        );
    }

    #[test]
    fn duplicate_and_empty_objects_are_kept() {
        let step = Step::new("stack", vec!["block".into(), "block".into()]);
        assert_eq!(step.focus_objects(), ["block", "block"]);

        let step = Step::new("wait", Vec::new());
        assert!(step.focus_objects().is_empty());
    }

    #[test]
    fn missing_focus_objects_fail_to_deserialize() {
        let result: Result<Step, _> = serde_json::from_str(r#"{"action": "wave"}"#);
        assert!(result.is_err());

        let result: Result<Step, _> =
            serde_json::from_str(r#"{"action": "wave", "focus_objects": [1, 2]}"#);
        assert!(result.is_err());
    }
}
