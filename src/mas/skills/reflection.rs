//! Reflection (§4.8): inspects what an agent has done so far in a stage
//! and either appends corrective steps or, when the stage goal already
//! looks satisfied, a single summary step.
//!
//! Grounded on `mas/skills/reflection.py`: the whitelist-retry contract and
//! the `<reflection_step>`/`<persistent_memory>` tags are load-bearing;
//! the Markdown prompt assembly is the excluded skill-body concern.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SendSharedMessage, SideEffectDescriptor, UpdateStageAgentState};
use crate::mas::skills::support::{extract_tag, extract_tag_json, parse_planned_steps, parse_step_kind};
use crate::mas::stage::AgentStageState;
use crate::mas::step::{Step, StepStatus};
use async_trait::async_trait;

pub struct ReflectionSkill;

#[async_trait]
impl Executor for ReflectionSkill {
    fn describe(&self) -> &str {
        "Reflects on whether the stage goal is met; adjusts the plan or summarizes."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            return Ok(fail(agent_state, step_id, None));
        };

        let (task_id, stage_id, goal) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            (step.task_id.clone(), step.stage_id.clone(), step.text_content.clone())
        };

        let response = llm.call(&goal, "reflection").await?;
        let Some(reflection_value) = extract_tag_json(&response, "reflection_step") else {
            return Ok(fail(agent_state, step_id, Some(response)));
        };
        let Some(mut planned) = parse_planned_steps(&reflection_value) else {
            return Ok(fail(agent_state, step_id, Some(response)));
        };

        let violations: Vec<String> = planned
            .iter()
            .filter(|s| match parse_step_kind(&s.kind) {
                Some(crate::mas::step::StepKind::Skill) => !agent_state.skills.contains(&s.executor),
                Some(crate::mas::step::StepKind::Tool) => !agent_state.tools.contains(&s.executor),
                None => true,
            })
            .map(|s| s.executor.clone())
            .collect();
        if !violations.is_empty() {
            planned.retain(|s| !violations.contains(&s.executor));
        }

        let is_summary = planned.is_empty();
        if is_summary {
            let summary_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, "summarize stage completion", crate::mas::step::StepKind::Skill, "summary", "", None);
            agent_state.add_step(summary_step);
        } else {
            for spec in &planned {
                let kind = parse_step_kind(&spec.kind).expect("filtered above");
                let new_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, &spec.step_intention, kind, &spec.executor, &spec.text_content, None);
                agent_state.add_step(new_step);
            }
        }

        if let Some(memory) = extract_tag(&response, "persistent_memory") {
            if !memory.is_empty() {
                agent_state.persistent_memory.push('\n');
                agent_state.persistent_memory.push_str(memory);
            }
        }

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
            step.execute_result = Some(serde_json::json!({"reflection_step": reflection_value}));
        }

        let state = if is_summary { AgentStageState::Finished } else { AgentStageState::Working };
        Ok(SideEffectDescriptor {
            update_stage_agent_state: Some(UpdateStageAgentState { task_id: task_id.clone(), stage_id: stage_id.clone(), agent_id: agent_state.agent_id.clone(), state }),
            send_shared_message: Some(SendSharedMessage {
                task_id,
                stage_id,
                agent_id: agent_state.agent_id.clone(),
                role: agent_state.role.clone(),
                content: format!("reflection step {}", if is_summary { "summarized and finished" } else { "adjusted the plan" }),
            }),
            ..Default::default()
        })
    }
}

fn fail(agent_state: &mut AgentState, step_id: &str, llm_response: Option<String>) -> SideEffectDescriptor {
    let (task_id, stage_id) = {
        let step = agent_state.agent_step.get_mut(step_id).expect("step exists for its own executor");
        step.status = StepStatus::Failed;
        if let Some(response) = llm_response {
            step.execute_result = Some(serde_json::json!({"llm_response": response}));
        }
        (step.task_id.clone(), step.stage_id.clone())
    };
    SideEffectDescriptor {
        update_stage_agent_state: Some(UpdateStageAgentState { task_id, stage_id, agent_id: agent_state.agent_id.clone(), state: AgentStageState::Failed }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::error::TransportError;
    use crate::mas::external::LLMClient;
    use crate::mas::step::StepKind;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct ScriptedLLM(&'static str);

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn call(&self, _prompt: &str, _context: &str) -> Result<String, TransportError> {
            Ok(self.0.to_string())
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn state_with(llm: Arc<dyn LLMClient>) -> AgentState {
        let mut skills = HashSet::new();
        skills.extend(["reflection".to_string(), "summary".to_string()]);
        let mut state = AgentState::new_autonomous("a1", "Alice", "worker", "", HashSet::new(), skills, llm);
        state.add_step(Step::new("t1", "s1", "a1", "reflect", StepKind::Skill, "reflection", "is the goal met?", None));
        state
    }

    #[tokio::test]
    async fn empty_reflection_appends_summary_step() {
        let llm = Arc::new(ScriptedLLM("<reflection_step>[]</reflection_step><persistent_memory></persistent_memory>"));
        let mut state = state_with(llm);
        let step_id = state.agent_step.iter().next().unwrap().step_id.clone();
        let descriptor = ReflectionSkill.execute(&step_id, &mut state).await.unwrap();

        assert_eq!(state.agent_step.iter().count(), 2);
        assert!(state.agent_step.iter().any(|s| s.executor_name == "summary"));
        assert_eq!(descriptor.update_stage_agent_state.unwrap().state, AgentStageState::Finished);
    }

    #[tokio::test]
    async fn non_empty_reflection_appends_corrective_steps() {
        let llm = Arc::new(ScriptedLLM(
            r#"<reflection_step>[{"step_intention":"redo","type":"skill","executor":"reflection","text_content":"try again"}]</reflection_step>"#,
        ));
        let mut state = state_with(llm);
        let step_id = state.agent_step.iter().next().unwrap().step_id.clone();
        let descriptor = ReflectionSkill.execute(&step_id, &mut state).await.unwrap();

        assert_eq!(state.agent_step.iter().count(), 2);
        assert_eq!(descriptor.update_stage_agent_state.unwrap().state, AgentStageState::Working);
    }
}
