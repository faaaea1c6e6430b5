//! Summary (§4.8): the terminal step reflection appends once it judges a
//! stage's goal met. Produces the `completion_summary` the synchronizer
//! records against the agent's stage entry (§4.4) and that downstream
//! stages/tasks read back when deciding whether to proceed.
//!
//! Grounded on `mas/skills/summary.py`: a single free-text `<summary>` tag,
//! unlike the JSON-shaped tags the other skills use, since there is nothing
//! further to parse out of it.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SendSharedMessage, SideEffectDescriptor, UpdateStageAgentCompletion};
use crate::mas::skills::support::extract_tag;
use crate::mas::step::StepStatus;
use async_trait::async_trait;

pub struct SummarySkill;

#[async_trait]
impl Executor for SummarySkill {
    fn describe(&self) -> &str {
        "Summarizes a finished stage's work for the task's shared record."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let (task_id, stage_id) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            (step.task_id.clone(), step.stage_id.clone())
        };

        let completion_summary = match agent_state.llm() {
            Some(llm) => {
                let goal = agent_state.agent_step.get(step_id).expect("step exists").text_content.clone();
                let response = llm.call(&goal, "summary").await?;
                extract_tag(&response, "summary").map(|s| s.to_string()).unwrap_or(response)
            }
            None => agent_state.agent_step.get(step_id).expect("step exists").text_content.clone(),
        };

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
            step.execute_result = Some(serde_json::json!({"completion_summary": completion_summary}));
        }

        Ok(SideEffectDescriptor {
            update_stage_agent_completion: Some(UpdateStageAgentCompletion {
                task_id: task_id.clone(),
                stage_id: stage_id.clone(),
                agent_id: agent_state.agent_id.clone(),
                completion_summary: completion_summary.clone(),
            }),
            send_shared_message: Some(SendSharedMessage {
                task_id,
                stage_id,
                agent_id: agent_state.agent_id.clone(),
                role: agent_state.role.clone(),
                content: completion_summary,
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::error::TransportError;
    use crate::mas::external::LLMClient;
    use crate::mas::step::{Step, StepKind};
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

    #[tokio::test]
    async fn extracts_summary_tag_and_emits_completion() {
        let llm = Arc::new(ScriptedLLM("<summary>wrote the report and filed it</summary>"));
        let mut skills = HashSet::new();
        skills.insert("summary".to_string());
        let mut state = AgentState::new_autonomous("a1", "Alice", "worker", "", HashSet::new(), skills, llm);
        let step_id = state.add_step(Step::new("t1", "s1", "a1", "summarize", StepKind::Skill, "summary", "stage history here", None));

        let descriptor = SummarySkill.execute(&step_id, &mut state).await.unwrap();
        let completion = descriptor.update_stage_agent_completion.unwrap();
        assert_eq!(completion.completion_summary, "wrote the report and filed it");
        assert_eq!(state.agent_step.get(&step_id).unwrap().status, StepStatus::Finished);
    }

    #[tokio::test]
    async fn operator_agent_falls_back_to_step_text() {
        let mut skills = HashSet::new();
        skills.insert("summary".to_string());
        let mut state = AgentState::new_operator("op1", "Operator", "human", "", HashSet::new(), skills);
        let step_id = state.add_step(Step::new("t1", "s1", "op1", "summarize", StepKind::Skill, "summary", "operator-authored summary", None));

        let descriptor = SummarySkill.execute(&step_id, &mut state).await.unwrap();
        assert_eq!(descriptor.update_stage_agent_completion.unwrap().completion_summary, "operator-authored summary");
    }
}
