//! Shared parsing helpers for skill executors: extracting tagged blocks
//! from raw LLM text (§4.8), the same "last match wins" convention the
//! message envelope's `<instruction>` parsing uses.

use crate::mas::step::StepKind;
use serde_json::Value;

pub fn parse_step_kind(kind: &str) -> Option<StepKind> {
    match kind {
        "skill" => Some(StepKind::Skill),
        "tool" => Some(StepKind::Tool),
        _ => None,
    }
}

/// Returns the content of the *last* `<tag>...</tag>` block in `text`, or
/// `None` if the tag never appears.
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let open_at = text.rfind(&open)?;
    let after_open = open_at + open.len();
    let close_at = text[after_open..].find(&close)? + after_open;
    Some(text[after_open..close_at].trim())
}

/// Parses the last `<tag>...</tag>` block as JSON.
pub fn extract_tag_json(text: &str, tag: &str) -> Option<Value> {
    let body = extract_tag(text, tag)?;
    if body.is_empty() {
        return Some(Value::Array(Vec::new()));
    }
    serde_json::from_str(body).ok()
}

/// A step the model wants appended, in the shared `planned_step`/
/// `tool_decision` shape (§11, grounded in the reference implementation's
/// `executor_base.add_step`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlannedStep {
    pub step_intention: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub executor: String,
    pub text_content: String,
}

pub fn parse_planned_steps(value: &Value) -> Option<Vec<PlannedStep>> {
    serde_json::from_value(value.clone()).ok()
}
