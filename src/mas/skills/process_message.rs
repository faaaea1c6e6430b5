//! Process-message (§4.8): a pure model read over inbound text that carried
//! no (or an already-handled) embedded instruction. May append to
//! `persistent_memory`; never enqueues further steps on its own.
//!
//! Grounded on `mas/skills/process_message.py`: the `<persistent_memory>`
//! tag convention matches planning/reflection/decision; prompt assembly is
//! the excluded skill-body concern (§1).

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::skills::support::extract_tag;
use crate::mas::step::StepStatus;
use async_trait::async_trait;

pub struct ProcessMessageSkill;

#[async_trait]
impl Executor for ProcessMessageSkill {
    fn describe(&self) -> &str {
        "Absorbs inbound message text into the agent's memory."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            // Operator agents have no LLM to read with; the text is already
            // visible to the human via the harness, so this is a no-op finish
            // rather than a failure.
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Finished;
            }
            return Ok(SideEffectDescriptor::default());
        };

        let text = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            step.text_content.clone()
        };

        let response = llm.call(&text, "process_message").await?;

        if let Some(memory) = extract_tag(&response, "persistent_memory") {
            if !memory.is_empty() {
                agent_state.persistent_memory.push('\n');
                agent_state.persistent_memory.push_str(memory);
            }
        }

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
            step.execute_result = Some(serde_json::json!({"llm_response": response}));
        }

        Ok(SideEffectDescriptor::default())
    }
}
