//! Planning (§4.8): reads the stage-start step, asks the model for a list
//! of follow-up steps, and rejects any plan that reaches outside the
//! agent's whitelist, retrying before giving up (§4.5, §8 scenario 5).
//!
//! Grounded on `mas/skills/planning.py`: prompt assembly is the excluded
//! skill-body concern (§1); the retry-on-whitelist-violation contract and
//! the `<planned_step>`/`<persistent_memory>` tag conventions are not.

use crate::mas::agent_state::AgentState;
use crate::mas::config::MasConfig;
use crate::mas::error::{MasError, ParseError};
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::skills::support::{extract_tag, extract_tag_json, parse_planned_steps, parse_step_kind};
use crate::mas::step::{Step, StepStatus};
use async_trait::async_trait;

pub struct PlanningSkill {
    config: MasConfig,
}

impl PlanningSkill {
    pub fn new(config: MasConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executor for PlanningSkill {
    fn describe(&self) -> &str {
        "Plans the steps needed to carry out the current stage."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let Some(llm) = agent_state.llm() else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
            }
            return Err(ParseError { step_id: step_id.to_string(), detail: "planning requires an LLM-backed agent".into() }.into());
        };

        let (task_id, stage_id, goal) = {
            let step = agent_state.agent_step.get(step_id).ok_or_else(|| ParseError {
                step_id: step_id.to_string(),
                detail: "unknown step".into(),
            })?;
            (step.task_id.clone(), step.stage_id.clone(), step.text_content.clone())
        };

        let mut response = llm.call(&goal, "planning").await?;
        let mut attempts = 0;
        let mut accepted = None;

        loop {
            let Some(planned_value) = extract_tag_json(&response, "planned_step") else {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"llm_response": response}));
                }
                return Ok(SideEffectDescriptor::default());
            };
            let Some(planned) = parse_planned_steps(&planned_value) else {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"llm_response": response}));
                }
                return Ok(SideEffectDescriptor::default());
            };

            let violations: Vec<&str> = planned
                .iter()
                .filter(|s| match parse_step_kind(&s.kind) {
                    Some(crate::mas::step::StepKind::Skill) => !agent_state.skills.contains(&s.executor),
                    Some(crate::mas::step::StepKind::Tool) => !agent_state.tools.contains(&s.executor),
                    None => true,
                })
                .map(|s| s.executor.as_str())
                .collect();

            if violations.is_empty() {
                accepted = Some(planned);
                break;
            }

            attempts += 1;
            if attempts > self.config.planning_retry_limit {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"error": "plan repeatedly used non-whitelisted executors", "violations": violations}));
                }
                return Ok(SideEffectDescriptor::default());
            }
            response = llm
                .call(&format!("the following executors are not whitelisted: {:?}; replan using only permitted skills and tools", violations), "planning")
                .await?;
        }

        let planned = accepted.unwrap_or_default();
        for spec in &planned {
            let kind = parse_step_kind(&spec.kind).expect("already validated against whitelist");
            let new_step = Step::new(&task_id, &stage_id, &agent_state.agent_id, &spec.step_intention, kind, &spec.executor, &spec.text_content, None);
            agent_state.add_step(new_step);
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
