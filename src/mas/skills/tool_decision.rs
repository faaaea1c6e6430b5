//! Tool-decision (§4.8, §8 scenario 3): the counterpart to
//! instruction-generation that closes the long-tail tool loop
//! (`instruction-generation -> tool -> tool-decision -> ...`). Inspects the
//! most recent finished step run by the named tool and decides whether to
//! queue another instruction-generation/tool pair or stop.
//!
//! Grounded on `mas/skills/tool_decision.py`: `tool_name` travels on the step
//! itself (`<tool_name>` in `text_content`, the same embedding convention
//! [`crate::mas::agent::AgentRuntime`]'s `add_tool_decision` instruction
//! handling already uses), not inside the LLM's own response — only the
//! `continue`/`finish` verdict is asked of the model.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::skills::support::{extract_tag, extract_tag_json};
use crate::mas::step::{Step, StepKind, StepStatus};
use async_trait::async_trait;

pub struct ToolDecisionSkill;

#[async_trait]
impl Executor for ToolDecisionSkill {
    fn describe(&self) -> &str {
        "Decides whether a long-tail tool loop continues with another call or stops."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Ok(SideEffectDescriptor::default());
        };

        let (task_id, stage_id, goal, tool_name) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            let tool_name = extract_tag(&step.text_content, "tool_name").unwrap_or("").to_string();
            (step.task_id.clone(), step.stage_id.clone(), step.text_content.clone(), tool_name)
        };

        if tool_name.is_empty() {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"error": "tool_decision step carries no tool_name"}));
            }
            return Ok(SideEffectDescriptor::default());
        }

        // Grounds the prompt in the actual last result rather than trusting
        // the model's own recollection of it.
        let last_result = agent_state.agent_step.last_finished_by_executor(&tool_name).and_then(|s| s.execute_result.clone());
        let prompt = format!("{}\nlast result from '{}': {}", goal, tool_name, last_result.clone().unwrap_or(serde_json::Value::Null));

        let response = llm.call(&prompt, "tool_decision").await?;
        let Some(decision) = extract_tag_json(&response, "tool_decision") else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let verdict = decision.get("verdict").and_then(|v| v.as_str()).unwrap_or("finish");

        if verdict == "continue" {
            let next_goal = decision.get("next_goal").and_then(|v| v.as_str()).unwrap_or(&goal).to_string();
            let tool_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, "continue tool loop", StepKind::Tool, &tool_name, &next_goal, None);
            agent_state.add_next_step(tool_step);
            let gen_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, "generate next instruction", StepKind::Skill, "instruction_generation", &next_goal, None);
            agent_state.add_next_step(gen_step);
        }

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
            step.execute_result = Some(serde_json::json!({"tool_name": tool_name, "verdict": verdict, "last_result": last_result}));
        }

        Ok(SideEffectDescriptor::default())
    }
}
