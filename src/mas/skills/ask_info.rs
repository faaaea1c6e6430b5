//! Ask-info (§4.8, §8 scenario 6): emits an `ask_info` descriptor carrying a
//! freshly generated waiting ID, which the synchronizer answers by
//! computing a query result and replying with a message that closes the
//! same token (§4.6).
//!
//! Grounded on `mas/skills/ask_info.py`: the `<ask_info_step>` tag carries
//! the query type plus any extra query parameters; answering the query is a
//! synchronizer-side concern (§4.6), not this skill's.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{AskInfo, Executor, SideEffectDescriptor};
use crate::mas::skills::support::extract_tag_json;
use crate::mas::step::StepStatus;
use async_trait::async_trait;
use uuid::Uuid;

pub struct AskInfoSkill;

#[async_trait]
impl Executor for AskInfoSkill {
    fn describe(&self) -> &str {
        "Asks the synchronizer for information about task/stage state and blocks on the reply."
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

        let response = llm.call(&goal, "ask_info").await?;
        let Some(query) = extract_tag_json(&response, "ask_info_step") else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let query_type = query.get("query_type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let extra = query.get("extra").cloned().unwrap_or(serde_json::Value::Null);

        let waiting_id = Uuid::new_v4().to_string();
        agent_state.step_lock.push(waiting_id.clone());

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
        }

        Ok(SideEffectDescriptor {
            ask_info: Some(AskInfo {
                query_type,
                waiting_id,
                sender_id: agent_state.agent_id.clone(),
                sender_task_id: task_id,
                extra,
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
    async fn emits_ask_info_and_locks_a_fresh_waiting_id() {
        let llm = Arc::new(ScriptedLLM(r#"<ask_info_step>{"query_type":"stage_status","extra":{"stage_id":"s1"}}</ask_info_step>"#));
        let mut skills = HashSet::new();
        skills.insert("ask_info".to_string());
        let mut state = AgentState::new_autonomous("a1", "Alice", "worker", "", HashSet::new(), skills, llm);
        let step_id = state.add_step(Step::new("t1", "s1", "a1", "ask about stage", StepKind::Skill, "ask_info", "what's the status?", None));

        let descriptor = AskInfoSkill.execute(&step_id, &mut state).await.unwrap();

        assert_eq!(state.step_lock.len(), 1);
        let ask = descriptor.ask_info.unwrap();
        assert_eq!(state.step_lock[0], ask.waiting_id);
        assert_eq!(ask.query_type, "stage_status");
        assert_eq!(state.agent_step.get(&step_id).unwrap().status, StepStatus::Finished);
    }

    #[tokio::test]
    async fn two_parallel_ask_infos_lock_independently() {
        let llm1 = Arc::new(ScriptedLLM(r#"<ask_info_step>{"query_type":"a"}</ask_info_step>"#));
        let llm2 = Arc::new(ScriptedLLM(r#"<ask_info_step>{"query_type":"b"}</ask_info_step>"#));
        let mut skills = HashSet::new();
        skills.insert("ask_info".to_string());

        let mut state1 = AgentState::new_autonomous("a1", "Alice", "worker", "", HashSet::new(), skills.clone(), llm1);
        let s1 = state1.add_step(Step::new("t1", "s1", "a1", "ask a", StepKind::Skill, "ask_info", "a?", None));
        let d1 = AskInfoSkill.execute(&s1, &mut state1).await.unwrap();

        let mut state2 = AgentState::new_autonomous("a2", "Bob", "worker", "", HashSet::new(), skills, llm2);
        let s2 = state2.add_step(Step::new("t1", "s1", "a2", "ask b", StepKind::Skill, "ask_info", "b?", None));
        let d2 = AskInfoSkill.execute(&s2, &mut state2).await.unwrap();

        assert_ne!(d1.ask_info.unwrap().waiting_id, d2.ask_info.unwrap().waiting_id);
        state1.close_waiting_id(&state1.step_lock[0].clone());
        assert!(state1.step_lock.is_empty());
        assert_eq!(state2.step_lock.len(), 1);
    }
}
