//! Step records and the per-agent step log.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// The literal stage ID used by task-scoped (not stage-scoped) steps.
pub const NO_STAGE: &str = "no_stage";

/// Whether a step is handled by a skill executor or the generic tool
/// executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Skill,
    Tool,
}

/// A step's lifecycle status. Transitions are monotonic: `Init`/`Pending` ->
/// `Running` -> `Finished`/`Failed`. See `INV-Step-Monotonic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Init,
    Pending,
    Running,
    Finished,
    Failed,
}

impl StepStatus {
    /// `finished`/`failed` steps never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Finished | StepStatus::Failed)
    }

    /// Ready-queue membership requires `init` or `pending` (`INV-Ready-Implies-Live`).
    pub fn is_live(self) -> bool {
        matches!(self, StepStatus::Init | StepStatus::Pending)
    }
}

/// Atomic unit of work owned by one agent: a skill or tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub task_id: String,
    pub stage_id: String,
    pub agent_id: String,
    pub step_intention: String,
    pub kind: StepKind,
    pub executor_name: String,
    pub status: StepStatus,
    pub text_content: String,
    pub instruction_content: Option<serde_json::Value>,
    pub execute_result: Option<serde_json::Value>,
}

impl Step {
    /// Constructs a new step. Tool steps with no `instruction_content` start
    /// `pending` rather than `init`, per §4.5.
    pub fn new(
        task_id: impl Into<String>,
        stage_id: impl Into<String>,
        agent_id: impl Into<String>,
        step_intention: impl Into<String>,
        kind: StepKind,
        executor_name: impl Into<String>,
        text_content: impl Into<String>,
        instruction_content: Option<serde_json::Value>,
    ) -> Self {
        let status = if kind == StepKind::Tool && instruction_content.is_none() {
            StepStatus::Pending
        } else {
            StepStatus::Init
        };
        Self {
            step_id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            stage_id: stage_id.into(),
            agent_id: agent_id.into(),
            step_intention: step_intention.into(),
            kind,
            executor_name: executor_name.into(),
            status,
            text_content: text_content.into(),
            instruction_content,
            execute_result: None,
        }
    }
}

/// Per-agent ordered log of steps plus a FIFO ready-queue of step IDs.
///
/// `steps`/`step_order` together model the spec's "ordered mapping,
/// append-only": a `HashMap` for O(1) lookup and a parallel `Vec` for
/// insertion order, the same split the reference crate's orchestration
/// module uses for its agent registry (`agents` + `agent_order`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStepLog {
    steps: HashMap<String, Step>,
    step_order: Vec<String>,
    ready_queue: VecDeque<String>,
}

impl AgentStepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes to the tail of both the log and the ready queue.
    pub fn append(&mut self, step: Step) -> String {
        let step_id = step.step_id.clone();
        self.ready_queue.push_back(step_id.clone());
        self.step_order.push(step_id.clone());
        self.steps.insert(step_id.clone(), step);
        step_id
    }

    /// Pushes to the log tail but the *front* of the ready queue, so the
    /// step runs before any previously queued step.
    pub fn insert_next(&mut self, step: Step) -> String {
        let step_id = step.step_id.clone();
        self.ready_queue.push_front(step_id.clone());
        self.step_order.push(step_id.clone());
        self.steps.insert(step_id.clone(), step);
        step_id
    }

    pub fn get(&self, step_id: &str) -> Option<&Step> {
        self.steps.get(step_id)
    }

    pub fn get_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.get_mut(step_id)
    }

    /// Pops the head of the ready queue, if any.
    pub fn pop_ready(&mut self) -> Option<String> {
        self.ready_queue.pop_front()
    }

    pub fn ready_len(&self) -> usize {
        self.ready_queue.len()
    }

    /// Steps in ready-queue order, without popping. Used by
    /// instruction-generation to find the next queued tool step whose
    /// instruction is still owed (§4.8).
    pub fn iter_ready(&self) -> impl Iterator<Item = &Step> {
        self.ready_queue.iter().filter_map(move |id| self.steps.get(id))
    }

    /// Most recent (highest insertion-order) finished step matching
    /// `executor_name`, used by tool-decision to inspect the latest result
    /// for a given tool (§4.8).
    pub fn last_finished_by_executor(&self, executor_name: &str) -> Option<&Step> {
        self.step_order
            .iter()
            .rev()
            .filter_map(|id| self.steps.get(id))
            .find(|s| s.executor_name == executor_name && s.status == StepStatus::Finished)
    }

    /// Steps in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.step_order.iter().filter_map(move |id| self.steps.get(id))
    }

    /// Removes every step belonging to `stage_id` within `task_id`, and any
    /// ready-queue references to them. Used by `finish_stage` (§4.4).
    /// Idempotent: a second call with nothing left to remove is a no-op.
    pub fn remove_by_stage(&mut self, task_id: &str, stage_id: &str) {
        self.remove_where(|s| s.task_id == task_id && s.stage_id == stage_id);
    }

    /// Removes every step belonging to `task_id`. Used by `finish_task`.
    pub fn remove_by_task(&mut self, task_id: &str) {
        self.remove_where(|s| s.task_id == task_id);
    }

    fn remove_where(&mut self, pred: impl Fn(&Step) -> bool) {
        let doomed: Vec<String> = self
            .steps
            .values()
            .filter(|s| pred(s))
            .map(|s| s.step_id.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }
        let doomed_set: std::collections::HashSet<&str> =
            doomed.iter().map(|s| s.as_str()).collect();
        self.ready_queue.retain(|id| !doomed_set.contains(id.as_str()));
        self.step_order.retain(|id| !doomed_set.contains(id.as_str()));
        for id in doomed {
            self.steps.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_step(text: &str) -> Step {
        Step::new("t1", "s1", "a1", "do a thing", StepKind::Tool, "fs", text, None)
    }

    #[test]
    fn tool_step_without_instruction_starts_pending() {
        let step = tool_step("ls");
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn skill_step_starts_init() {
        let step = Step::new("t1", "s1", "a1", "plan", StepKind::Skill, "planning", "", None);
        assert_eq!(step.status, StepStatus::Init);
    }

    #[test]
    fn append_pushes_tail_of_both_log_and_queue() {
        let mut log = AgentStepLog::new();
        let id1 = log.append(tool_step("first"));
        let id2 = log.append(tool_step("second"));
        assert_eq!(log.pop_ready(), Some(id1));
        assert_eq!(log.pop_ready(), Some(id2));
        assert_eq!(log.iter().count(), 2);
    }

    #[test]
    fn insert_next_preempts_queue_but_not_log_order() {
        let mut log = AgentStepLog::new();
        let first = log.append(tool_step("first"));
        let urgent = log.insert_next(tool_step("urgent"));
        // queue order: urgent first
        assert_eq!(log.pop_ready(), Some(urgent.clone()));
        assert_eq!(log.pop_ready(), Some(first.clone()));
        // log order: append order preserved
        let ids: Vec<&str> = log.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), urgent.as_str()]);
    }

    #[test]
    fn remove_by_stage_purges_log_and_queue() {
        let mut log = AgentStepLog::new();
        log.append(tool_step("a"));
        log.append(Step::new("t1", "s2", "a1", "other stage", StepKind::Tool, "fs", "b", None));
        log.remove_by_stage("t1", "s1");
        assert_eq!(log.iter().count(), 1);
        assert_eq!(log.ready_len(), 1);
        // idempotent
        log.remove_by_stage("t1", "s1");
        assert_eq!(log.iter().count(), 1);
    }
}
