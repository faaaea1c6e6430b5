//! Decision (§4.8): a stage-decoupled counterpart to reflection, used for
//! reactive off-stage work (e.g. an urgent reply). Its steps are inserted
//! at the head of the ready queue rather than appended to the tail.
//!
//! Grounded on `mas/skills/decision.py`.

use crate::mas::agent_state::AgentState;
use crate::mas::error::MasError;
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::skills::support::{extract_tag, extract_tag_json, parse_planned_steps, parse_step_kind};
use crate::mas::step::{Step, StepStatus};
use async_trait::async_trait;

pub struct DecisionSkill;

#[async_trait]
impl Executor for DecisionSkill {
    fn describe(&self) -> &str {
        "Decides on reactive, stage-independent follow-up steps and inserts them next."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Ok(SideEffectDescriptor::default());
        };

        let (task_id, stage_id, goal) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            (step.task_id.clone(), step.stage_id.clone(), step.text_content.clone())
        };

        let response = llm.call(&goal, "decision").await?;
        let parsed = extract_tag_json(&response, "decision_step").and_then(|v| parse_planned_steps(&v));

        let Some(planned) = parsed else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"llm_response": response}));
            }
            return Ok(SideEffectDescriptor::default());
        };

        let accepted: Vec<_> = planned
            .into_iter()
            .filter(|s| match parse_step_kind(&s.kind) {
                Some(crate::mas::step::StepKind::Skill) => agent_state.skills.contains(&s.executor),
                Some(crate::mas::step::StepKind::Tool) => agent_state.tools.contains(&s.executor),
                None => false,
            })
            .collect();

        // Inserted in reverse so the first planned step ends up at the
        // front of the ready queue (each insert_next pushes to the head).
        for spec in accepted.iter().rev() {
            let kind = parse_step_kind(&spec.kind).expect("filtered above");
            let new_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, &spec.step_intention, kind, &spec.executor, &spec.text_content, None);
            agent_state.add_next_step(new_step);
        }

        if let Some(memory) = extract_tag(&response, "persistent_memory") {
            if !memory.is_empty() {
                agent_state.persistent_memory.push('\n');
                agent_state.persistent_memory.push_str(memory);
            }
        }

        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
            step.status = StepStatus::Finished;
        }

        Ok(SideEffectDescriptor::default())
    }
}
