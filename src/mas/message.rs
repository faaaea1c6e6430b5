//! The universal inter-agent message envelope (§3) and the embedded
//! `<instruction>…</instruction>` control payload (§4.4).

use serde::{Deserialize, Serialize};

/// `stage_relative` value for messages that aren't scoped to any stage.
pub const NO_RELATIVE: &str = "no_relative";

const INSTRUCTION_OPEN: &str = "<instruction>";
const INSTRUCTION_CLOSE: &str = "</instruction>";

/// Universal envelope carried on every task's communication queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub task_id: String,
    pub sender_id: String,
    pub receiver: Vec<String>,
    pub message: String,
    pub stage_relative: String,
    pub need_reply: bool,
    pub waiting: Option<Vec<String>>,
    pub return_waiting_id: Option<String>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver: Vec<String>,
        message: impl Into<String>,
        stage_relative: impl Into<String>,
        need_reply: bool,
        waiting: Option<Vec<String>>,
        return_waiting_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            sender_id: sender_id.into(),
            receiver,
            message: message.into(),
            stage_relative: stage_relative.into(),
            need_reply,
            waiting,
            return_waiting_id,
        }
    }

    /// Builds a message whose body is exactly one `<instruction>…</instruction>`
    /// block wrapping `payload` as JSON. Used by the synchronizer for
    /// control messages (`start_stage`, `update_working_memory`, …).
    pub fn instruction(
        task_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver: Vec<String>,
        payload: &serde_json::Value,
        stage_relative: impl Into<String>,
    ) -> Self {
        let body = format!("{}{}{}", INSTRUCTION_OPEN, payload, INSTRUCTION_CLOSE);
        Self::new(task_id, sender_id, receiver, body, stage_relative, false, None, None)
    }

    /// Index of `agent_id` in `receiver`, used to derive `return_waiting_id`
    /// from the parallel `waiting` list (§4.3).
    pub fn waiting_id_for(&self, agent_id: &str) -> Option<&String> {
        let idx = self.receiver.iter().position(|r| r == agent_id)?;
        self.waiting.as_ref()?.get(idx)
    }

    /// Parses the *last* `<instruction>…</instruction>` block in `message`
    /// (if any) as JSON, matching the reference crate's manual brace-aware
    /// extraction idiom (no `regex` dependency) rather than a byte-offset
    /// string search, since instruction payloads can themselves contain the
    /// literal substrings `<instruction>`/`</instruction>` only inside a
    /// quoted JSON string, never as raw tag text — a straightforward
    /// rfind/find pair is therefore correct here without a JSON-aware
    /// scanner, since the tags themselves never nest.
    pub fn parse_instruction(&self) -> Option<serde_json::Value> {
        let open_at = self.message.rfind(INSTRUCTION_OPEN)?;
        let after_open = open_at + INSTRUCTION_OPEN.len();
        let close_at = self.message[after_open..].find(INSTRUCTION_CLOSE)? + after_open;
        let body = &self.message[after_open..close_at];
        serde_json::from_str(body).ok()
    }

    /// The message text with the last `<instruction>…</instruction>` block
    /// removed, trimmed. Empty if the message was instruction-only.
    pub fn text_without_instruction(&self) -> String {
        match self.message.rfind(INSTRUCTION_OPEN) {
            Some(open_at) => {
                let after_open = open_at + INSTRUCTION_OPEN.len();
                match self.message[after_open..].find(INSTRUCTION_CLOSE) {
                    Some(close_offset) => {
                        let close_at = after_open + close_offset + INSTRUCTION_CLOSE.len();
                        format!("{}{}", &self.message[..open_at], &self.message[close_at..]).trim().to_string()
                    }
                    None => self.message.trim().to_string(),
                }
            }
            None => self.message.trim().to_string(),
        }
    }
}
