//! The agent runtime (§4.2, §4.3): worker loop and message intake, sharing
//! one agent-state mutex (§5).

use crate::mas::agent_state::{AgentState, WorkingState};
use crate::mas::config::MasConfig;
use crate::mas::executor::ExecutorRegistry;
use crate::mas::message::Message;
use crate::mas::step::{Step, StepKind, StepStatus};
use crate::mas::synchronizer::Synchronizer;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Serializable view of one agent, for `§6 snapshot()`. Plain clone of the
/// fields external observers (the operator console, the state monitor) need
/// to read; the agent-state mutex is held only for the duration of the
/// clone, the same access pattern `Synchronizer::snapshot_all` uses for
/// task/stage records.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub name: String,
    pub role: String,
    pub working_state: WorkingState,
    pub step_lock: Vec<String>,
    pub steps: Vec<Step>,
}

/// One agent's runtime: its state behind a single mutex, plus handles to
/// the shared registry and synchronizer it calls out to.
pub struct AgentRuntime {
    pub agent_id: String,
    state: Mutex<AgentState>,
    registry: Arc<ExecutorRegistry>,
    synchronizer: Arc<Synchronizer>,
}

impl AgentRuntime {
    pub fn new(state: AgentState, registry: Arc<ExecutorRegistry>, synchronizer: Arc<Synchronizer>) -> Arc<Self> {
        Arc::new(Self { agent_id: state.agent_id.clone(), state: Mutex::new(state), registry, synchronizer })
    }

    /// The worker loop (§4.2). Runs until `shutdown` is signaled, at which
    /// point it finishes whatever step it is mid-execution and exits
    /// promptly rather than leaving a step `running`.
    pub async fn run_worker_loop(self: Arc<Self>, config: MasConfig, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut state = self.state.lock().await;

            if state.is_locked() {
                state.working_state = WorkingState::Waiting;
                drop(state);
                if Self::park(config.worker_poll_interval, &mut shutdown).await {
                    return;
                }
                continue;
            }

            let Some(step_id) = state.agent_step.pop_ready() else {
                drop(state);
                if Self::park(config.worker_poll_interval, &mut shutdown).await {
                    return;
                }
                continue;
            };

            let (kind, executor_name) = {
                let Some(step) = state.agent_step.get_mut(&step_id) else {
                    continue;
                };
                step.status = StepStatus::Running;
                (step.kind, step.executor_name.clone())
            };
            state.working_state = WorkingState::Working;

            let executor = match self.registry.resolve(kind, &executor_name) {
                Ok(e) => e,
                Err(e) => {
                    log::error!("agent {}: {}", self.agent_id, e);
                    if let Some(step) = state.agent_step.get_mut(&step_id) {
                        step.status = StepStatus::Failed;
                        step.execute_result = Some(serde_json::json!({"error": e.to_string()}));
                    }
                    state.working_state = WorkingState::Idle;
                    continue;
                }
            };

            // The state mutex is held for the full executor call (§4.2),
            // since `state` is a live MutexGuard kept across the await.
            let result = executor.execute(&step_id, &mut state).await;

            // Defense in depth: the executor owns the status transition,
            // but the loop never returns with a step left `running`.
            if let Some(step) = state.agent_step.get_mut(&step_id) {
                if step.status == StepStatus::Running {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"error": "executor returned without terminating the step"}));
                }
            }
            state.working_state = WorkingState::Idle;

            match result {
                Ok(descriptor) => {
                    drop(state);
                    if !descriptor.is_empty() {
                        if let Err(e) = self.synchronizer.apply(descriptor, &self.agent_id).await {
                            log::error!("agent {}: synchronizer apply failed: {}", self.agent_id, e);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("agent {} step {} failed: {}", self.agent_id, step_id, e);
                    drop(state);
                }
            }
        }
    }

    /// Parks for `interval` or until shutdown is signaled; returns `true`
    /// if shutdown fired.
    async fn park(interval: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }

    /// Message intake (§4.3), called from the dispatcher.
    pub async fn receive_message(&self, message: Message) {
        let mut state = self.state.lock().await;

        if message.need_reply {
            let return_waiting_id = message.waiting_id_for(&self.agent_id).cloned();
            let mut text_content = message.message.clone();
            if let Some(w) = &return_waiting_id {
                text_content.push_str(&format!("<return_waiting_id>{}</return_waiting_id>", w));
            }
            let step = Step::new(
                &message.task_id,
                &message.stage_relative,
                &self.agent_id,
                "reply to message",
                StepKind::Skill,
                "send_message",
                text_content,
                None,
            );
            if return_waiting_id.is_some() {
                state.add_next_step(step);
            } else {
                state.add_step(step);
            }
        } else {
            self.process_message_locked(&mut state, &message);
        }

        if let Some(return_waiting_id) = &message.return_waiting_id {
            state.close_waiting_id(return_waiting_id);
        }
    }

    /// Inline instruction handling (§4.4). Takes the already-locked state so
    /// it can run as part of `receive_message` without a second lock
    /// acquisition.
    fn process_message_locked(&self, state: &mut AgentState, message: &Message) {
        let instruction = message.parse_instruction();
        let remaining_text = message.text_without_instruction();

        if let Some(instruction) = instruction {
            self.apply_instruction(state, message, &instruction);
        }

        if !remaining_text.is_empty() {
            let step = Step::new(
                &message.task_id,
                &message.stage_relative,
                &self.agent_id,
                "process message",
                StepKind::Skill,
                "process_message",
                remaining_text,
                None,
            );
            if message.return_waiting_id.is_some() {
                state.add_next_step(step);
            } else {
                state.add_step(step);
            }
        }
    }

    fn apply_instruction(&self, state: &mut AgentState, message: &Message, instruction: &serde_json::Value) {
        let Some(obj) = instruction.as_object() else {
            log::warn!("agent {}: instruction payload was not a JSON object", self.agent_id);
            return;
        };
        // Single-key contract (§4.4): only the first recognized key is
        // honored; additional keys are out of scope.
        if let Some(payload) = obj.get("start_stage") {
            // The synchronizer already broadcast this instruction to every
            // allocated agent (§4.6 `start_stage`); receiving it is the
            // signal for this agent to seed its own first step of the stage,
            // a planning step (§4.8), not to re-trigger the broadcast.
            let stage_id = payload.get("stage_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let step = Step::new(&message.task_id, &stage_id, &self.agent_id, "plan stage", StepKind::Skill, "planning", "", None);
            state.add_step(step);
        } else if let Some(payload) = obj.get("finish_stage") {
            let stage_id = payload.get("stage_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            state.agent_step.remove_by_stage(&message.task_id, &stage_id);
            if let Some(stages) = state.working_memory.get_mut(&message.task_id) {
                stages.remove(&stage_id);
            }
        } else if let Some(payload) = obj.get("finish_task") {
            let task_id = payload.get("task_id").and_then(|v| v.as_str()).unwrap_or(&message.task_id).to_string();
            state.agent_step.remove_by_task(&task_id);
            state.working_memory.remove(&task_id);
        } else if let Some(payload) = obj.get("update_working_memory") {
            let task_id = payload.get("task_id").and_then(|v| v.as_str()).unwrap_or(&message.task_id).to_string();
            let stage_entry = state.working_memory.entry(task_id).or_default();
            if let Some(stage_id) = payload.get("stage_id").and_then(|v| v.as_str()) {
                stage_entry.entry(stage_id.to_string()).or_default();
            }
        } else if let Some(payload) = obj.get("add_tool_decision") {
            let tool_name = payload.get("tool_name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let step = Step::new(
                &message.task_id,
                &message.stage_relative,
                &self.agent_id,
                "decide on tool result",
                StepKind::Skill,
                "tool_decision",
                format!("<tool_name>{}</tool_name>", tool_name),
                None,
            );
            state.add_next_step(step);
        } else {
            log::debug!("agent {}: ignoring unrecognized instruction keys {:?}", self.agent_id, obj.keys().collect::<Vec<_>>());
        }
    }

    /// Seeds the first step of a stage: a planning step, per §4.7/§4.8.
    pub async fn seed_planning_step(&self, task_id: &str, stage_id: &str) {
        let mut state = self.state.lock().await;
        let step = Step::new(task_id, stage_id, &self.agent_id, "plan stage", StepKind::Skill, "planning", "", None);
        state.add_step(step);
    }

    pub async fn snapshot_working_state(&self) -> WorkingState {
        self.state.lock().await.working_state
    }

    /// A point-in-time, serializable view of this agent's state, including
    /// its step log and step lock (§6 `snapshot()`).
    pub async fn snapshot(&self) -> AgentSnapshot {
        let state = self.state.lock().await;
        AgentSnapshot {
            agent_id: state.agent_id.clone(),
            name: state.name.clone(),
            role: state.role.clone(),
            working_state: state.working_state,
            step_lock: state.step_lock.clone(),
            steps: state.agent_step.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::error::MasError;
    use crate::mas::executor::{Executor, SideEffectDescriptor};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct ImmediateFinish;

    #[async_trait]
    impl Executor for ImmediateFinish {
        async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Finished;
            }
            Ok(SideEffectDescriptor::default())
        }
    }

    fn registry() -> Arc<ExecutorRegistry> {
        Arc::new(
            ExecutorRegistry::builder()
                .register(StepKind::Skill, "planning", Arc::new(ImmediateFinish))
                .build(),
        )
    }

    #[tokio::test]
    async fn worker_loop_runs_ready_step_and_exits_on_shutdown() {
        let synchronizer = Arc::new(Synchronizer::new(None));
        let mut state = AgentState::new_operator("a1", "Alice", "worker", "", HashSet::new(), ["planning".to_string()].into());
        state.add_step(Step::new("t1", "s1", "a1", "plan", StepKind::Skill, "planning", "", None));
        let runtime = AgentRuntime::new(state, registry(), synchronizer);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runtime.clone().run_worker_loop(MasConfig::default(), rx));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receive_message_with_need_reply_inserts_next_reply_step() {
        let synchronizer = Arc::new(Synchronizer::new(None));
        let state = AgentState::new_operator("a1", "Alice", "worker", "", HashSet::new(), ["send_message".to_string()].into());
        let runtime = AgentRuntime::new(state, registry(), synchronizer);

        let mut message = Message::new("t1", "b1", vec!["a1".into()], "please respond", "no_relative", true, Some(vec!["w1".into()]), None);
        message.waiting = Some(vec!["w1".into()]);
        runtime.receive_message(message).await;

        let mut state = runtime.state.lock().await;
        let step_id = state.agent_step.pop_ready().unwrap();
        let step = state.agent_step.get(&step_id).unwrap();
        assert!(step.text_content.contains("<return_waiting_id>w1</return_waiting_id>"));
    }

    #[tokio::test]
    async fn receive_message_with_need_reply_but_no_waiting_appends_reply_step() {
        let synchronizer = Arc::new(Synchronizer::new(None));
        let mut state = AgentState::new_operator("a1", "Alice", "worker", "", HashSet::new(), ["send_message".to_string()].into());
        state.add_step(Step::new("t1", "s1", "a1", "earlier work", StepKind::Skill, "send_message", "already queued", None));
        let runtime = AgentRuntime::new(state, registry(), synchronizer);

        let message = Message::new("t1", "b1", vec!["a1".into()], "please respond", "no_relative", true, None, None);
        runtime.receive_message(message).await;

        let mut state = runtime.state.lock().await;
        let first = state.agent_step.pop_ready().unwrap();
        assert_eq!(state.agent_step.get(&first).unwrap().text_content, "already queued", "a non-blocking reply must not preempt already-queued work");
        let second = state.agent_step.pop_ready().unwrap();
        assert_eq!(state.agent_step.get(&second).unwrap().text_content, "please respond");
    }

    #[tokio::test]
    async fn return_waiting_id_unlocks_step_lock_idempotently() {
        let synchronizer = Arc::new(Synchronizer::new(None));
        let mut state = AgentState::new_operator("a1", "Alice", "worker", "", HashSet::new(), HashSet::new());
        state.step_lock.push("w1".to_string());
        let runtime = AgentRuntime::new(state, registry(), synchronizer);

        let message = Message::new("t1", "b1", vec!["a1".into()], "ok", "no_relative", false, None, Some("w1".into()));
        runtime.receive_message(message.clone()).await;
        assert!(runtime.state.lock().await.step_lock.is_empty());

        // redelivering the same return_waiting_id is a no-op
        runtime.receive_message(message).await;
        assert!(runtime.state.lock().await.step_lock.is_empty());
    }
}
