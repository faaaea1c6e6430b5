//! Send-message (§4.8, §8 scenario 2): either emits a `send_message`
//! descriptor directly, or — when the model judges information is missing —
//! turns itself into a retriable long-tail skill by appending-next a
//! `decision` step followed by a fresh copy of itself.
//!
//! Grounded on `mas/skills/send_message.py`: the `<send_message_step>` tag
//! carries the `action` discriminant (`"send"` / `"need_info"`) plus the
//! envelope fields for the `"send"` case; the `<return_waiting_id>` tag is
//! appended by agent intake (§4.3), not generated here.

use crate::mas::agent_state::AgentState;
use crate::mas::error::{MasError, ParseError};
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::message::{Message, NO_RELATIVE};
use crate::mas::skills::support::{extract_tag, extract_tag_json};
use crate::mas::step::{Step, StepKind, StepStatus};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum SendMessageDecision {
    Send {
        receiver: Vec<String>,
        message: String,
        #[serde(default)]
        need_reply: bool,
        #[serde(default)]
        waiting: bool,
    },
    NeedInfo {
        #[serde(default)]
        query: String,
    },
}

pub struct SendMessageSkill;

#[async_trait]
impl Executor for SendMessageSkill {
    fn describe(&self) -> &str {
        "Sends a message to one or more agents, or defers to gather missing information first."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Err(ParseError { step_id: step_id.to_string(), detail: "send_message requires an LLM-backed agent".into() }.into());
        };

        let (task_id, stage_id, goal, return_waiting_id) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            let return_waiting_id = extract_tag(&step.text_content, "return_waiting_id").map(|s| s.to_string());
            (step.task_id.clone(), step.stage_id.clone(), step.text_content.clone(), return_waiting_id)
        };

        let response = llm.call(&goal, "send_message").await?;
        let Some(decision_value) = extract_tag_json(&response, "send_message_step") else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };
        let Ok(decision) = serde_json::from_value::<SendMessageDecision>(decision_value) else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        match decision {
            SendMessageDecision::NeedInfo { query } => {
                // Turns send-message into a retriable long-tail skill
                // (§4.8): insert a copy of this step first so it ends up
                // *behind* the decision step once both are at the head
                // (each insert_next pushes to the front).
                let retry = Step::new(&task_id, &stage_id, &agent_state.agent_id, "retry send_message", StepKind::Skill, "send_message", &goal, None);
                agent_state.add_next_step(retry);
                let decision_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, "decide how to gather missing info", StepKind::Skill, "decision", query, None);
                agent_state.add_next_step(decision_step);

                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Finished;
                }
                Ok(SideEffectDescriptor::default())
            }
            SendMessageDecision::Send { receiver, message, need_reply, waiting } => {
                let waiting_ids = if waiting {
                    let ids: Vec<String> = receiver.iter().map(|_| Uuid::new_v4().to_string()).collect();
                    agent_state.step_lock.extend(ids.iter().cloned());
                    Some(ids)
                } else {
                    None
                };

                let envelope = Message::new(
                    task_id.clone(),
                    agent_state.agent_id.clone(),
                    receiver,
                    message,
                    if stage_id.is_empty() { NO_RELATIVE.to_string() } else { stage_id.clone() },
                    need_reply,
                    waiting_ids,
                    return_waiting_id,
                );

                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Finished;
                }

                Ok(SideEffectDescriptor { send_message: Some(envelope), ..Default::default() })
            }
        }
    }
}
