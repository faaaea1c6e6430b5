//! Task-manager (§4.8, §4.6, §11): emits a `task_instruction` descriptor.
//! The synchronizer-side authorization check (only the task's registered
//! `task_manager` may `add_stage`/`finish_stage`/`finish_task`) lives in
//! [`crate::mas::synchronizer`]; this skill only shapes the descriptor.
//!
//! Grounded on `mas/skills/task_manager.py`: the `<task_instruction>` tag's
//! single-key-by-`action` shape mirrors the embedded-instruction contract
//! already used for inbound messages (§4.4).

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SideEffectDescriptor, StageSpec, TaskInstruction};
use crate::mas::skills::support::extract_tag_json;
use crate::mas::step::StepStatus;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct TaskManagerSkill;

#[async_trait]
impl Executor for TaskManagerSkill {
    fn describe(&self) -> &str {
        "Creates tasks and stages, and finishes stages/tasks it manages."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Ok(SideEffectDescriptor::default());
        };

        let (task_id, goal) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            (step.task_id.clone(), step.text_content.clone())
        };

        let response = llm.call(&goal, "task_manager").await?;
        let Some(payload) = extract_tag_json(&response, "task_instruction") else {
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

        let instruction = if let Some(v) = obj.get("add_task") {
            v.get("task_intention")
                .and_then(|v| v.as_str())
                .map(|intention| TaskInstruction::AddTask { agent_id: agent_state.agent_id.clone(), task_intention: intention.to_string() })
        } else if let Some(v) = obj.get("add_stage") {
            v.get("stages").and_then(|v| v.as_array()).map(|stages| {
                let parsed = stages
                    .iter()
                    .filter_map(|s| {
                        let intention = s.get("stage_intention")?.as_str()?.to_string();
                        let allocation: HashMap<String, String> = s.get("agent_allocation")?.as_object()?.iter().filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string()))).collect();
                        Some(StageSpec { stage_intention: intention, agent_allocation: allocation })
                    })
                    .collect();
                TaskInstruction::AddStage { agent_id: agent_state.agent_id.clone(), task_id: task_id.clone(), stages: parsed }
            })
        } else if let Some(v) = obj.get("finish_stage") {
            v.get("stage_id")
                .and_then(|v| v.as_str())
                .map(|sid| TaskInstruction::FinishStage { agent_id: agent_state.agent_id.clone(), task_id: task_id.clone(), stage_id: sid.to_string() })
        } else if obj.contains_key("finish_task") {
            Some(TaskInstruction::FinishTask { agent_id: agent_state.agent_id.clone(), task_id: task_id.clone() })
        } else {
            None
        };

        let Some(instruction) = instruction else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"error": "unrecognized or malformed task_instruction", "llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
        }

        Ok(SideEffectDescriptor { task_instruction: Some(instruction), ..Default::default() })
    }
}
