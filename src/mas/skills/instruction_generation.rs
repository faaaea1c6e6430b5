//! Instruction-generation (§4.8, §8 scenario 3): reads the next queued tool
//! step still awaiting its `instruction_content`, generates it, and
//! transitions that step from `pending` to `init` so the worker loop's next
//! pass can actually run it.
//!
//! Grounded on `mas/skills/instruction_generation.py`: the `<tool_instruction>`
//! tag carries the same `instruction_type`/`tool_name`/`arguments` shape the
//! tool executor (§4.9) itself interprets.

use crate::mas::agent_state::AgentState;
use crate::mas::error::{MasError, ParseError};
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::skills::support::extract_tag_json;
use crate::mas::step::{StepKind, StepStatus};
use async_trait::async_trait;

pub struct InstructionGenerationSkill;

#[async_trait]
impl Executor for InstructionGenerationSkill {
    fn describe(&self) -> &str {
        "Generates the instruction payload for the next queued tool step."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Err(ParseError { step_id: step_id.to_string(), detail: "instruction_generation requires an LLM-backed agent".into() }.into());
        };

        let goal = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            step.text_content.clone()
        };

        let Some(target_step_id) = agent_state
            .agent_step
            .iter_ready()
            .find(|s| s.kind == StepKind::Tool && s.status == StepStatus::Pending)
            .map(|s| s.step_id.clone())
        else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"error": "no pending tool step queued"}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let target_goal = agent_state.agent_step.get(&target_step_id).map(|s| s.text_content.clone()).unwrap_or_default();
        let response = llm.call(&format!("{}\n{}", goal, target_goal), "instruction_generation").await?;

        let Some(instruction) = extract_tag_json(&response, "tool_instruction") else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        if let Some(target) = agent_state.agent_step.get_mut(&target_step_id) {
            target.instruction_content = Some(instruction);
            target.status = StepStatus::Init;
        }

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
        }

        Ok(SideEffectDescriptor::default())
    }
}
