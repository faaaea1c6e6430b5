//! The concrete agent-state record: a sum type for autonomous vs. operator
//! agents rather than an untyped map.

use crate::mas::external::LLMClient;
use crate::mas::step::AgentStepLog;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingState {
    Idle,
    Working,
    Waiting,
}

/// A single entry in an operator's `conversation_pool`, grouped by peer
/// agent and task.
#[derive(Debug, Clone, Default)]
pub struct ConversationPool {
    entries: HashMap<(String, String), Vec<String>>,
}

impl ConversationPool {
    pub fn record(&mut self, peer_agent_id: &str, task_id: &str, content: impl Into<String>) {
        self.entries
            .entry((peer_agent_id.to_string(), task_id.to_string()))
            .or_default()
            .push(content.into());
    }

    pub fn for_peer(&self, peer_agent_id: &str, task_id: &str) -> &[String] {
        self.entries
            .get(&(peer_agent_id.to_string(), task_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// What distinguishes an LLM-driven agent from a human-driven one. The
/// operator variant omits the LLM handle and adds a conversation pool.
pub enum AgentVariant {
    Autonomous { llm: Arc<dyn LLMClient> },
    Operator { conversation_pool: ConversationPool },
}

impl std::fmt::Debug for AgentVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentVariant::Autonomous { .. } => write!(f, "AgentVariant::Autonomous"),
            AgentVariant::Operator { .. } => write!(f, "AgentVariant::Operator"),
        }
    }
}

/// Nested `task_id -> stage_id -> [step_id]` index of an agent's live
/// commitments. `process_message`'s `update_working_memory` instruction and
/// `finish_stage`/`finish_task` purges operate on this directly.
pub type WorkingMemory = HashMap<String, HashMap<String, Vec<String>>>;

/// The full state of one agent, held behind a single mutex shared by the
/// worker loop and message intake.
#[derive(Debug)]
pub struct AgentState {
    pub agent_id: String,
    pub name: String,
    pub role: String,
    pub profile: String,
    pub working_state: WorkingState,
    pub working_memory: WorkingMemory,
    pub persistent_memory: String,
    pub agent_step: AgentStepLog,
    pub step_lock: Vec<String>,
    pub tools: HashSet<String>,
    pub skills: HashSet<String>,
    pub variant: AgentVariant,
}

impl AgentState {
    pub fn new_autonomous(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        profile: impl Into<String>,
        tools: HashSet<String>,
        skills: HashSet<String>,
        llm: Arc<dyn LLMClient>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            role: role.into(),
            profile: profile.into(),
            working_state: WorkingState::Idle,
            working_memory: WorkingMemory::new(),
            persistent_memory: String::new(),
            agent_step: AgentStepLog::new(),
            step_lock: Vec::new(),
            tools,
            skills,
            variant: AgentVariant::Autonomous { llm },
        }
    }

    pub fn new_operator(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        profile: impl Into<String>,
        tools: HashSet<String>,
        skills: HashSet<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            role: role.into(),
            profile: profile.into(),
            working_state: WorkingState::Idle,
            working_memory: WorkingMemory::new(),
            persistent_memory: String::new(),
            agent_step: AgentStepLog::new(),
            step_lock: Vec::new(),
            tools,
            skills,
            variant: AgentVariant::Operator { conversation_pool: ConversationPool::default() },
        }
    }

    /// Whether `executor_name` is permitted for steps of `kind`
    /// (`INV-Whitelist`).
    pub fn is_whitelisted(&self, kind: crate::mas::step::StepKind, executor_name: &str) -> bool {
        match kind {
            crate::mas::step::StepKind::Skill => self.skills.contains(executor_name),
            crate::mas::step::StepKind::Tool => self.tools.contains(executor_name),
        }
    }

    /// Appends to the tail of the ready queue, recorded in working memory.
    pub fn add_step(&mut self, step: crate::mas::step::Step) -> String {
        let task_id = step.task_id.clone();
        let stage_id = step.stage_id.clone();
        let step_id = self.agent_step.append(step);
        self.working_memory
            .entry(task_id)
            .or_default()
            .entry(stage_id)
            .or_default()
            .push(step_id.clone());
        step_id
    }

    /// Inserted at the head of the ready queue, still recorded in working
    /// memory.
    pub fn add_next_step(&mut self, step: crate::mas::step::Step) -> String {
        let task_id = step.task_id.clone();
        let stage_id = step.stage_id.clone();
        let step_id = self.agent_step.insert_next(step);
        self.working_memory
            .entry(task_id)
            .or_default()
            .entry(stage_id)
            .or_default()
            .push(step_id.clone());
        step_id
    }

    /// Removes a waiting ID from the lock set. Unknown tokens are a
    /// documented no-op (idempotence, `INV-Waiting-ID-Closure`).
    pub fn close_waiting_id(&mut self, waiting_id: &str) {
        self.step_lock.retain(|w| w != waiting_id);
    }

    pub fn is_locked(&self) -> bool {
        !self.step_lock.is_empty()
    }

    /// The agent's LLM handle, if it is an autonomous agent. Operator
    /// agents have none; LLM-backed skills fail their step rather than
    /// calling through a missing client.
    pub fn llm(&self) -> Option<Arc<dyn LLMClient>> {
        match &self.variant {
            AgentVariant::Autonomous { llm } => Some(llm.clone()),
            AgentVariant::Operator { .. } => None,
        }
    }
}
