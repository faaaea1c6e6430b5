//! Agent-manager (§4.8, §11): emits an `agent_instruction` descriptor. §1
//! excludes the concrete agent-lifecycle actions (spawn/fork/retire an
//! agent) as a harness concern; the core's contract is limited to routing
//! an opaque `action` + payload, the same shape `task_instruction` uses for
//! its own sub-actions.
//!
//! Grounded on `mas/skills/agent_manager.py`.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{AgentInstruction, Executor, SideEffectDescriptor};
use crate::mas::skills::support::extract_tag_json;
use crate::mas::step::StepStatus;
use async_trait::async_trait;

pub struct AgentManagerSkill;

#[async_trait]
impl Executor for AgentManagerSkill {
    fn describe(&self) -> &str {
        "Requests agent-lifecycle actions from the surrounding harness."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Ok(SideEffectDescriptor::default());
        };

        let goal = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            step.text_content.clone()
        };

        let response = llm.call(&goal, "agent_manager").await?;
        let Some(payload) = extract_tag_json(&response, "agent_instruction") else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let Some(obj) = payload.as_object() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let Some((action, action_payload)) = obj.iter().next() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"error": "empty agent_instruction", "llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let instruction = AgentInstruction { action: action.clone(), payload: action_payload.clone() };

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
        }

        Ok(SideEffectDescriptor { agent_instruction: Some(instruction), ..Default::default() })
    }
}
