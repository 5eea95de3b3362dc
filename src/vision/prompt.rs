//! Prompt construction and verdict parsing for language-model analyzers.

use serde::Deserialize;

use super::{StepContext, Verdict};
use crate::error::{Error, Result};

const INTRO: &str = "I will send you the previous task, the current task and the next task. \
Additionally I will send you the current live video frame plus the frames from one second ago \
and two seconds ago. Your job is to tell me whether the person has completed the current task \
or is doing something wrong or something else entirely instead of the current task.";

const FORMAT: &str = r#"I need your answer to follow this format in case the person is doing the current task:
{
    "status": "working"
}
If the person completed the current task:
{
    "status": "completed"
}
If the person is doing something wrong or something else that they should not be doing based on the current task, also add the focus objects (the objects they need to manipulate) and what to do with them:
{
    "status": "derailed",
    "focus_objects": ["bottle opener", "desk"],
    "action": "place bottle opener on desk"
}"#;

/// Build the analysis prompt for `context`.
///
/// # Examples
///
/// ```
/// use stepguide::task::Step;
/// use stepguide::vision::{build_prompt, StepContext};
///
/// let context = StepContext {
///     previous: Step::none(),
///     current: Step::new("pick up cup", vec!["cup".into()]),
///     next: Step::new("pour water", vec!["cup".into(), "bottle".into()]),
/// };
/// let prompt = build_prompt(&context);
/// assert!(prompt.contains("Current task: Step(action='pick up cup', focus_objects=[cup])"));
/// assert!(prompt.contains("\"status\": \"derailed\""));
/// ```
pub fn build_prompt(context: &StepContext) -> String {
    format!(
        "{INTRO}\n\nPrevious task: {}\nCurrent task: {}\nNext task: {}\n\n{FORMAT}",
        context.previous, context.current, context.next
    )
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    status: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    focus_objects: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a model reply into a [`Verdict`].
///
/// The reply may wrap its JSON object in prose or a fenced code block.
/// Statuses `working`/`executing_task`, `completed`/`completed_task`,
/// `derailed` and `error` are recognized; any other status becomes an
/// [`Verdict::Error`] naming it.
///
/// # Errors
///
/// Returns [`Error::Analysis`] when the reply holds no JSON object with a
/// string `status`.
///
/// # Examples
///
/// ```
/// use stepguide::vision::{parse_verdict, Verdict};
///
/// let reply = "```json\n{\"status\": \"completed\"}\n```";
/// assert_eq!(parse_verdict(reply).unwrap(), Verdict::Completed);
///
/// let reply = r#"{"status": "sleeping"}"#;
/// assert_eq!(
///     parse_verdict(reply).unwrap(),
///     Verdict::Error { message: "Unknown task status: sleeping".into() }
/// );
/// ```
pub fn parse_verdict(reply: &str) -> Result<Verdict> {
    let json = extract_object(reply)
        .ok_or_else(|| Error::analysis(format!("no JSON object in model reply: {reply}")))?;
    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|e| Error::analysis(format!("malformed verdict: {e}")))?;

    let verdict = match raw.status.trim() {
        "working" | "executing_task" => Verdict::Executing,
        "completed" | "completed_task" => Verdict::Completed,
        "derailed" => Verdict::Derailed {
            action: raw.action.unwrap_or_default(),
            focus_objects: raw.focus_objects,
        },
        "error" => Verdict::Error {
            message: raw
                .message
                .unwrap_or_else(|| "Frame analysis failed".to_string()),
        },
        other => Verdict::Error {
            message: format!("Unknown task status: {other}"),
        },
    };
    Ok(verdict)
}

/// Slice from the first `{` to the last `}`.
fn extract_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Step;
    use pretty_assertions::assert_eq;

    #[test]
    fn prompt_lists_all_three_steps() {
        let context = StepContext {
            previous: Step::new("open lid", vec![]),
            current: Step::new("pick up cup", vec!["cup".into()]),
            next: Step::none(),
        };
        let prompt = build_prompt(&context);
        assert!(prompt.contains("Previous task: Step(action='open lid', focus_objects=[])"));
        assert!(prompt.contains("Next task: Step(action='none', focus_objects=[])"));
    }

    #[test]
    fn parses_plain_and_canonical_statuses() {
        assert_eq!(
            parse_verdict(r#"{"status": "working"}"#).unwrap(),
            Verdict::Executing
        );
        assert_eq!(
            parse_verdict(r#"{"status": "executing_task"}"#).unwrap(),
            Verdict::Executing
        );
        assert_eq!(
            parse_verdict(r#"{"status": "completed_task"}"#).unwrap(),
            Verdict::Completed
        );
    }

    #[test]
    fn parses_derailed_with_prose_around_it() {
        let reply = r#"Looks off track.
{"status": "derailed", "focus_objects": ["bottle"], "action": "put the bottle down"}
Hope that helps."#;
        assert_eq!(
            parse_verdict(reply).unwrap(),
            Verdict::Derailed {
                action: "put the bottle down".into(),
                focus_objects: vec!["bottle".into()],
            }
        );
    }

    #[test]
    fn error_status_keeps_message() {
        let verdict =
            parse_verdict(r#"{"status": "error", "message": "frame too dark"}"#).unwrap();
        assert_eq!(
            verdict,
            Verdict::Error {
                message: "frame too dark".into()
            }
        );
    }

    #[test]
    fn replies_without_status_are_errors() {
        assert!(matches!(
            parse_verdict("I cannot tell."),
            Err(Error::Analysis(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"state": "working"}"#),
            Err(Error::Analysis(_))
        ));
        assert!(parse_verdict("} {").is_err());
    }
}
