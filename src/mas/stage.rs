//! Stage records: a goal shared by a subset of agents within a task.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageExecutionState {
    Init,
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStageState {
    Idle,
    Working,
    Waiting,
    Finished,
    Failed,
}

/// One event per stage: the completion callback described in §4.6/§9 fires
/// exactly once, when `completion_summary.keys() == agent_allocation.keys()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCompletionEvent {
    pub task_id: String,
    pub stage_id: String,
    pub completion_summary: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub stage_id: String,
    pub task_id: String,
    pub stage_intention: String,
    pub agent_allocation: HashMap<String, String>,
    pub execution_state: StageExecutionState,
    pub per_agent_state: HashMap<String, AgentStageState>,
    pub completion_summary: HashMap<String, String>,
    /// Set once the completion callback has fired, so `INV-Stage-Completion-Once`
    /// holds even if `update_stage_agent_completion` is (erroneously) applied
    /// again with the same full set of agents.
    #[serde(default)]
    completion_fired: bool,
}

impl Stage {
    pub fn new(task_id: impl Into<String>, stage_intention: impl Into<String>, agent_allocation: HashMap<String, String>) -> Self {
        let per_agent_state = agent_allocation
            .keys()
            .map(|id| (id.clone(), AgentStageState::Idle))
            .collect();
        Self {
            stage_id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            stage_intention: stage_intention.into(),
            agent_allocation,
            execution_state: StageExecutionState::Init,
            per_agent_state,
            completion_summary: HashMap::new(),
            completion_fired: false,
        }
    }

    pub fn update_agent_state(&mut self, agent_id: &str, state: AgentStageState) {
        self.per_agent_state.insert(agent_id.to_string(), state);
    }

    /// Records `agent_id`'s completion summary and returns `Some(event)`
    /// exactly the first time every allocated agent has reported.
    pub fn update_agent_completion(
        &mut self,
        agent_id: &str,
        completion_summary: impl Into<String>,
    ) -> Option<StageCompletionEvent> {
        self.completion_summary
            .insert(agent_id.to_string(), completion_summary.into());

        if self.completion_fired {
            return None;
        }

        let all_agents: std::collections::HashSet<&String> = self.agent_allocation.keys().collect();
        let reported: std::collections::HashSet<&String> = self.completion_summary.keys().collect();
        if all_agents == reported {
            self.completion_fired = true;
            Some(StageCompletionEvent {
                task_id: self.task_id.clone(),
                stage_id: self.stage_id.clone(),
                completion_summary: self.completion_summary.clone(),
            })
        } else {
            None
        }
    }
}
