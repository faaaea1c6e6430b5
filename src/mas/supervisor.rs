//! The MAS supervisor (§2, §6): lifecycle owner. Creates and registers
//! agents, starts the dispatcher, bootstraps the root task, and exposes
//! agent/task lookup to the surrounding harness.

use crate::mas::agent::{AgentRuntime, AgentSnapshot};
use crate::mas::agent_state::AgentState;
use crate::mas::config::MasConfig;
use crate::mas::dispatcher::MessageDispatcher;
use crate::mas::error::{ConfigError, MasError, StageLogicError};
use crate::mas::executor::ExecutorRegistry;
use crate::mas::external::LLMClient;
use crate::mas::message::Message;
use crate::mas::synchronizer::{SynchronizerObserver, Synchronizer, TaskSnapshot};
use crate::mas::task::Task;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Configuration for registering an LLM-driven agent (§6 `register_agent`).
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    pub role: String,
    pub profile: String,
    pub tools: HashSet<String>,
    pub skills: HashSet<String>,
    pub llm: Arc<dyn LLMClient>,
}

/// Configuration for registering a human-driven agent (§6 `register_operator`).
pub struct OperatorConfig {
    pub agent_id: String,
    pub name: String,
    pub role: String,
    pub profile: String,
    pub tools: HashSet<String>,
    pub skills: HashSet<String>,
}

/// Combined, serializable view returned by `Mas::snapshot()` (§6): every
/// task/stage record plus every agent's own step log and step lock.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MasSnapshot {
    pub tasks: Vec<TaskSnapshot>,
    pub agents: Vec<AgentSnapshot>,
}

/// Lifecycle owner for one running MAS instance.
pub struct Mas {
    config: MasConfig,
    registry: Arc<ExecutorRegistry>,
    synchronizer: Arc<Synchronizer>,
    agents: Arc<RwLock<HashMap<String, Arc<AgentRuntime>>>>,
    dispatcher: Arc<MessageDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    root_task_id: String,
}

impl Mas {
    /// Constructs a supervisor and its root task. The root task has no
    /// stages and no dedicated manager agent; it exists so that the very
    /// first `add_task`/`add_stage` instruction issued by whichever agent
    /// becomes a task manager always has a live synchronizer entry to
    /// register against (§11 "root-task bootstrap").
    pub async fn new(registry: ExecutorRegistry, config: MasConfig, observer: Option<Arc<dyn SynchronizerObserver>>) -> Self {
        let synchronizer = Arc::new(Synchronizer::new(observer));
        let root_task = Task::new("root", "root task", "supervisor", vec![]);
        let root_task_id = synchronizer.add_task(root_task).await;

        let agents = Arc::new(RwLock::new(HashMap::new()));
        let dispatcher = MessageDispatcher::new(synchronizer.clone(), agents.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            registry: Arc::new(registry),
            synchronizer,
            agents,
            dispatcher,
            shutdown_tx,
            shutdown_rx,
            worker_handles: tokio::sync::Mutex::new(Vec::new()),
            root_task_id,
        }
    }

    pub fn root_task_id(&self) -> &str {
        &self.root_task_id
    }

    /// Starts the dispatcher's background loop. Call once, after
    /// registering whatever agents the caller wants running from the start.
    pub async fn start(&self) {
        let dispatcher = self.dispatcher.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(dispatcher.run(config, shutdown_rx));
        self.worker_handles.lock().await.push(handle);
    }

    /// Registers an LLM-driven agent and spawns its worker loop.
    pub async fn register_agent(&self, cfg: AgentConfig) -> Result<String, ConfigError> {
        let agent_id = cfg.agent_id.clone();
        {
            let agents = self.agents.read().await;
            if agents.contains_key(&agent_id) {
                return Err(ConfigError::DuplicateAgent { agent_id });
            }
        }
        let state = AgentState::new_autonomous(cfg.agent_id, cfg.name, cfg.role, cfg.profile, cfg.tools, cfg.skills, cfg.llm);
        self.spawn_agent(state).await;
        Ok(agent_id)
    }

    /// Registers a human-driven agent and spawns its worker loop.
    pub async fn register_operator(&self, cfg: OperatorConfig) -> Result<String, ConfigError> {
        let agent_id = cfg.agent_id.clone();
        {
            let agents = self.agents.read().await;
            if agents.contains_key(&agent_id) {
                return Err(ConfigError::DuplicateAgent { agent_id });
            }
        }
        let state = AgentState::new_operator(cfg.agent_id, cfg.name, cfg.role, cfg.profile, cfg.tools, cfg.skills);
        self.spawn_agent(state).await;
        Ok(agent_id)
    }

    async fn spawn_agent(&self, state: AgentState) {
        let agent_id = state.agent_id.clone();
        let runtime = AgentRuntime::new(state, self.registry.clone(), self.synchronizer.clone());
        self.agents.write().await.insert(agent_id, runtime.clone());

        let config = self.config.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(runtime.run_worker_loop(config, shutdown_rx));
        self.worker_handles.lock().await.push(handle);
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    /// `create_task(name, intention, manager_id) -> task_id` (§6).
    pub async fn create_task(&self, name: impl Into<String>, intention: impl Into<String>, manager_id: impl Into<String>) -> String {
        let manager_id = manager_id.into();
        let task = Task::new(name, intention, manager_id.clone(), vec![manager_id]);
        self.synchronizer.add_task(task).await
    }

    /// `start_stage(task_id, stage_id, sender_id)` (§6, §4.6).
    pub async fn start_stage(&self, task_id: &str, stage_id: &str, sender_id: &str) -> Result<(), StageLogicError> {
        self.synchronizer.start_stage(task_id, stage_id, sender_id).await
    }

    /// `snapshot()` (§6): a serializable view of every task, stage, agent,
    /// and step record. Task/stage records come from the synchronizer's
    /// single authoritative map; agent/step records are read one agent at a
    /// time through each agent's own mutex, since those are per-agent
    /// resources the synchronizer doesn't own (§5).
    pub async fn snapshot(&self) -> MasSnapshot {
        let tasks = self.synchronizer.snapshot_all().await;
        let runtimes: Vec<Arc<AgentRuntime>> = self.agents.read().await.values().cloned().collect();
        let mut agents = Vec::with_capacity(runtimes.len());
        for runtime in runtimes {
            agents.push(runtime.snapshot().await);
        }
        MasSnapshot { tasks, agents }
    }

    /// The operator variant of send-message (§6): an operator posts a
    /// message directly onto a task's queue rather than going through a
    /// skill executor.
    pub async fn send_operator_message(
        &self,
        operator_id: &str,
        task_id: &str,
        receivers: Vec<String>,
        content: impl Into<String>,
        stage_relative: impl Into<String>,
    ) -> Result<(), MasError> {
        let message = Message::new(task_id, operator_id, receivers, content, stage_relative, false, None, None);
        let applied = crate::mas::executor::SideEffectDescriptor { send_message: Some(message), ..Default::default() };
        self.synchronizer.apply(applied, operator_id).await
    }

    /// Signals every worker and the dispatcher to stop, and waits for them
    /// to exit. Workers finish (or abandon, leaving the step `failed`) their
    /// current step before returning (§4.2).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::error::TransportError;
    use crate::mas::executor::{Executor, SideEffectDescriptor};
    use crate::mas::step::{StepKind, StepStatus};
    use async_trait::async_trait;

    struct StubLLM;

    #[async_trait]
    impl LLMClient for StubLLM {
        async fn call(&self, _prompt: &str, _context: &str) -> Result<String, TransportError> {
            Ok("{}".to_string())
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct ImmediateFinishSkill;

    #[async_trait]
    impl Executor for ImmediateFinishSkill {
        async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Finished;
            }
            Ok(SideEffectDescriptor::default())
        }
    }

    fn test_registry() -> ExecutorRegistry {
        ExecutorRegistry::builder()
            .register(StepKind::Skill, "planning", Arc::new(ImmediateFinishSkill))
            .build()
    }

    #[tokio::test]
    async fn register_agent_rejects_duplicate_ids() {
        let mas = Mas::new(test_registry(), MasConfig::default(), None).await;
        let cfg = AgentConfig {
            agent_id: "a1".into(),
            name: "Alice".into(),
            role: "worker".into(),
            profile: "".into(),
            tools: HashSet::new(),
            skills: ["planning".to_string()].into(),
            llm: Arc::new(StubLLM),
        };
        mas.register_agent(cfg).await.unwrap();
        let cfg2 = AgentConfig {
            agent_id: "a1".into(),
            name: "Alice2".into(),
            role: "worker".into(),
            profile: "".into(),
            tools: HashSet::new(),
            skills: HashSet::new(),
            llm: Arc::new(StubLLM),
        };
        let err = mas.register_agent(cfg2).await.unwrap_err();
        assert_eq!(err, ConfigError::DuplicateAgent { agent_id: "a1".into() });
        mas.shutdown().await;
    }

    #[tokio::test]
    async fn start_stage_seeds_planning_step_for_allocated_agent() {
        let mas = Mas::new(test_registry(), MasConfig::default(), None).await;
        let cfg = OperatorConfig {
            agent_id: "a1".into(),
            name: "Alice".into(),
            role: "worker".into(),
            profile: "".into(),
            tools: HashSet::new(),
            skills: ["planning".to_string()].into(),
        };
        mas.register_operator(cfg).await.unwrap();
        mas.start().await;

        let task_id = mas.create_task("ship", "ship it", "a1").await;
        let mut allocation = HashMap::new();
        allocation.insert("a1".to_string(), "do the work".to_string());
        let stage = crate::mas::stage::Stage::new(task_id.clone(), "build", allocation);
        let stage_id = stage.stage_id.clone();

        let add_stage = SideEffectDescriptor {
            task_instruction: Some(crate::mas::executor::TaskInstruction::AddStage {
                agent_id: "a1".into(),
                task_id: task_id.clone(),
                stages: vec![crate::mas::executor::StageSpec {
                    stage_intention: "build".into(),
                    agent_allocation: stage.agent_allocation.clone(),
                }],
            }),
            ..Default::default()
        };
        // apply via synchronizer directly exercises the same path register_agent's
        // worker would take through a task-manager skill.
        let synchronizer = mas.synchronizer.clone();
        synchronizer.apply(add_stage, "a1").await.unwrap();
        let snapshot = mas.snapshot().await;
        let real_stage_id = snapshot.tasks[0].stages[0].stage_id.clone();
        assert_ne!(real_stage_id, stage_id); // Stage::new mints a fresh id each time; just sanity on snapshot shape
        mas.start_stage(&task_id, &real_stage_id, "a1").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        mas.shutdown().await;
    }
}
