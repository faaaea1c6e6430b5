//! The executor registry and the side-effect descriptor executors hand
//! back to the synchronizer.

use crate::mas::agent_state::AgentState;
use crate::mas::error::{ConfigError, MasError};
use crate::mas::message::Message;
use crate::mas::stage::AgentStageState;
use crate::mas::step::StepKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The literal executor name every tool step resolves to in the registry,
/// regardless of the target server named by the step's own
/// `executor_name`.
pub const GENERIC_TOOL_HANDLER: &str = "<generic tool handler>";

#[derive(Debug, Clone)]
pub struct UpdateStageAgentState {
    pub task_id: String,
    pub stage_id: String,
    pub agent_id: String,
    pub state: AgentStageState,
}

#[derive(Debug, Clone)]
pub struct SendSharedMessage {
    pub task_id: String,
    pub stage_id: String,
    pub agent_id: String,
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage_intention: String,
    pub agent_allocation: HashMap<String, String>,
}

/// Task-manager side effects.
#[derive(Debug, Clone)]
pub enum TaskInstruction {
    AddTask { agent_id: String, task_intention: String },
    AddStage { agent_id: String, task_id: String, stages: Vec<StageSpec> },
    FinishStage { agent_id: String, task_id: String, stage_id: String },
    FinishTask { agent_id: String, task_id: String },
}

/// Agent-manager side effects. The spec leaves this contract largely to the
/// excluded skill bodies; the core only needs an opaque action name plus a
/// payload to route it, the same shape `task_instruction` uses.
#[derive(Debug, Clone)]
pub struct AgentInstruction {
    pub action: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AskInfo {
    pub query_type: String,
    pub waiting_id: String,
    pub sender_id: String,
    pub sender_task_id: String,
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct UpdateStageAgentCompletion {
    pub task_id: String,
    pub stage_id: String,
    pub agent_id: String,
    pub completion_summary: String,
}

/// Tagged union of everything a step's executor may ask the synchronizer to
/// do. Modeled as a struct of `Option`s rather than a Rust `enum`: the
/// recognized effects are all optional and combinable in one descriptor,
/// and an `enum` would force picking exactly one per step.
#[derive(Debug, Clone, Default)]
pub struct SideEffectDescriptor {
    pub update_stage_agent_state: Option<UpdateStageAgentState>,
    pub send_shared_message: Option<SendSharedMessage>,
    pub send_message: Option<Message>,
    pub task_instruction: Option<TaskInstruction>,
    pub agent_instruction: Option<AgentInstruction>,
    pub ask_info: Option<AskInfo>,
    pub update_stage_agent_completion: Option<UpdateStageAgentCompletion>,
}

impl SideEffectDescriptor {
    pub fn is_empty(&self) -> bool {
        self.update_stage_agent_state.is_none()
            && self.send_shared_message.is_none()
            && self.send_message.is_none()
            && self.task_instruction.is_none()
            && self.agent_instruction.is_none()
            && self.ask_info.is_none()
            && self.update_stage_agent_completion.is_none()
    }
}

/// One concrete skill or tool implementation, resolved by name from the
/// registry. `execute` owns moving the step from `running` to
/// `finished`/`failed` and populating `execute_result` — the worker loop
/// itself never touches step status.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError>;

    /// Short human-readable description, surfaced in whitelist prompts the
    /// way the reference crate's `ToolMetadata::description` is. Assembling
    /// the actual prompt text is an excluded skill-body concern; the
    /// description itself is in scope.
    fn describe(&self) -> &str {
        ""
    }
}

/// Process-wide table keyed by `(kind, executor_name)`. Immutable after
/// `build()` is called: the registry is a value constructed at startup and
/// passed into the supervisor, not a singleton.
pub struct ExecutorRegistry {
    entries: HashMap<(StepKind, String), Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder { entries: HashMap::new() }
    }

    /// Resolves the executor for a step. Tool steps always route through
    /// the single generic handler regardless of the step's own
    /// `executor_name`, which instead names the target tool server.
    pub fn resolve(&self, kind: StepKind, executor_name: &str) -> Result<Arc<dyn Executor>, ConfigError> {
        let lookup_name = match kind {
            StepKind::Tool => GENERIC_TOOL_HANDLER,
            StepKind::Skill => executor_name,
        };
        self.entries
            .get(&(kind, lookup_name.to_string()))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownExecutor { kind: format!("{:?}", kind), name: lookup_name.to_string() })
    }
}

pub struct ExecutorRegistryBuilder {
    entries: HashMap<(StepKind, String), Arc<dyn Executor>>,
}

impl ExecutorRegistryBuilder {
    pub fn register(mut self, kind: StepKind, name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.entries.insert((kind, name.into()), executor);
        self
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry { entries: self.entries }
    }
}
