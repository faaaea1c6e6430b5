//! The synchronizer (§4.6): single writer to task/stage records, applier of
//! executor side-effect descriptors.

use crate::mas::error::{MasError, StageLogicError};
use crate::mas::executor::{SideEffectDescriptor, TaskInstruction};
use crate::mas::message::{Message, NO_RELATIVE};
use crate::mas::stage::{Stage, StageCompletionEvent, StageExecutionState};
use crate::mas::task::{Task, TaskExecutionState};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Observer hook for every synchronizer-owned mutation, the in-core
/// equivalent of the reference crate's `EventHandler`/the original's
/// `StateMonitor.track` decorator (§9, §11). All methods default to a
/// no-op so implementors override only what they need; the supervisor
/// installs at most one observer, never a hidden global.
#[async_trait]
pub trait SynchronizerObserver: Send + Sync {
    async fn on_task_added(&self, _task_id: &str) {}
    async fn on_stage_added(&self, _task_id: &str, _stage_id: &str) {}
    async fn on_stage_started(&self, _task_id: &str, _stage_id: &str) {}
    async fn on_stage_finished(&self, _task_id: &str, _stage_id: &str) {}
    async fn on_stage_completion(&self, _event: &StageCompletionEvent) {}
    async fn on_task_finished(&self, _task_id: &str) {}
    async fn on_message_enqueued(&self, _task_id: &str) {}
    async fn on_refused(&self, _detail: &str) {}
}

/// Snapshot DTOs for `§6 snapshot()`. Plain clones of the serializable
/// fields of `Task`/`Stage`; the live `Task` itself cannot be cloned since
/// it owns an mpsc receiver.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageSnapshot {
    pub stage_id: String,
    pub stage_intention: String,
    pub agent_allocation: HashMap<String, String>,
    pub execution_state: StageExecutionState,
    pub completion_summary: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_name: String,
    pub task_manager: String,
    pub execution_state: TaskExecutionState,
    pub stages: Vec<StageSnapshot>,
}

impl From<&Stage> for StageSnapshot {
    fn from(s: &Stage) -> Self {
        Self {
            stage_id: s.stage_id.clone(),
            stage_intention: s.stage_intention.clone(),
            agent_allocation: s.agent_allocation.clone(),
            execution_state: s.execution_state,
            completion_summary: s.completion_summary.clone(),
        }
    }
}

impl From<&Task> for TaskSnapshot {
    fn from(t: &Task) -> Self {
        Self {
            task_id: t.task_id.clone(),
            task_name: t.task_name.clone(),
            task_manager: t.task_manager.clone(),
            execution_state: t.execution_state,
            stages: t.stages.iter().map(StageSnapshot::from).collect(),
        }
    }
}

impl serde::Serialize for TaskExecutionState {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let name = match self {
            TaskExecutionState::Init => "init",
            TaskExecutionState::Running => "running",
            TaskExecutionState::Finished => "finished",
            TaskExecutionState::Failed => "failed",
        };
        s.serialize_str(name)
    }
}

/// Owns the authoritative `task_id -> Task` map and is the sole writer to
/// every task/stage record (§4.6, §5).
pub struct Synchronizer {
    tasks: RwLock<HashMap<String, Task>>,
    observer: Option<Arc<dyn SynchronizerObserver>>,
}

impl Synchronizer {
    pub fn new(observer: Option<Arc<dyn SynchronizerObserver>>) -> Self {
        Self { tasks: RwLock::new(HashMap::new()), observer }
    }

    async fn notify<'a, F, Fut>(&'a self, f: F)
    where
        F: FnOnce(Arc<dyn SynchronizerObserver>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if let Some(observer) = self.observer.clone() {
            f(observer).await;
        }
    }

    pub async fn add_task(&self, task: Task) -> String {
        let task_id = task.task_id.clone();
        self.tasks.write().await.insert(task_id.clone(), task);
        let obs_id = task_id.clone();
        self.notify(|o| async move { o.on_task_added(&obs_id).await }).await;
        task_id
    }

    pub async fn get_task_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.read().await.get(task_id).map(TaskSnapshot::from)
    }

    pub async fn get_stage_snapshot(&self, task_id: &str, stage_id: &str) -> Option<StageSnapshot> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .and_then(|t| t.get_stage(stage_id))
            .map(StageSnapshot::from)
    }

    pub async fn snapshot_all(&self) -> Vec<TaskSnapshot> {
        self.tasks.read().await.values().map(TaskSnapshot::from).collect()
    }

    /// Non-blocking drain of one task's outbound queue, for the dispatcher
    /// (§4.7).
    pub async fn drain_task_queue(&self, task_id: &str) -> std::collections::VecDeque<Message> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) => task.drain(),
            None => std::collections::VecDeque::new(),
        }
    }

    /// Records a delivered envelope in the task's `shared_conversation_pool`
    /// (§4.7).
    pub async fn record_delivered(&self, task_id: &str, message: Message) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.record_delivered(message);
        }
        let obs_task_id = task_id.to_string();
        drop(tasks);
        self.notify(|o| async move { o.on_message_enqueued(&obs_task_id).await }).await;
    }

    /// For every agent allocated to `stage_id`, enqueue a `start_stage`
    /// instruction message on the task's outbound queue (§4.6).
    pub async fn start_stage(&self, task_id: &str, stage_id: &str, sender_id: &str) -> Result<(), StageLogicError> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(task_id).ok_or_else(|| StageLogicError {
            task_id: task_id.to_string(),
            detail: "start_stage on unknown task".into(),
        })?;
        let stage = task.get_stage(stage_id).ok_or_else(|| StageLogicError {
            task_id: task_id.to_string(),
            detail: format!("start_stage on unknown stage {}", stage_id),
        })?;
        let payload = json!({"start_stage": {"stage_id": stage_id}});
        for agent_id in stage.agent_allocation.keys() {
            let message = Message::instruction(task_id, sender_id, vec![agent_id.clone()], &payload, stage_id);
            task.enqueue(message);
        }
        drop(tasks);
        self.notify(|o| {
            let task_id = task_id.to_string();
            let stage_id = stage_id.to_string();
            async move { o.on_stage_started(&task_id, &stage_id).await }
        })
        .await;
        Ok(())
    }

    /// Applies one side-effect descriptor (§4.1, §4.6). The whole call runs
    /// under the tasks map's write lock, which is how concurrent `apply`
    /// calls are serialized (§4.6 concurrency requirement).
    pub async fn apply(&self, descriptor: SideEffectDescriptor, requesting_agent_id: &str) -> Result<(), MasError> {
        let mut tasks = self.tasks.write().await;

        if let Some(u) = &descriptor.update_stage_agent_state {
            if let Some(task) = tasks.get_mut(&u.task_id) {
                if let Some(stage) = task.get_stage_mut(&u.stage_id) {
                    stage.update_agent_state(&u.agent_id, u.state);
                }
            }
        }

        if let Some(s) = &descriptor.send_shared_message {
            if let Some(task) = tasks.get_mut(&s.task_id) {
                task.add_shared_message(s.agent_id.clone(), s.role.clone(), s.stage_id.clone(), s.content.clone());
            }
        }

        if let Some(m) = &descriptor.send_message {
            if let Some(task) = tasks.get(&m.task_id) {
                task.enqueue(m.clone());
            }
        }

        let mut completion_event = None;
        if let Some(c) = &descriptor.update_stage_agent_completion {
            if let Some(task) = tasks.get_mut(&c.task_id) {
                if let Some(stage) = task.get_stage_mut(&c.stage_id) {
                    completion_event = stage.update_agent_completion(&c.agent_id, c.completion_summary.clone());
                }
            }
        }

        let mut refusal: Option<String> = None;
        let mut added_task_id: Option<String> = None;
        if let Some(instr) = &descriptor.task_instruction {
            added_task_id = self.apply_task_instruction(&mut tasks, instr, requesting_agent_id, &mut refusal);
        }

        if let Some(ask) = &descriptor.ask_info {
            let answer = match tasks.get(&ask.sender_task_id) {
                Some(task) => json!({
                    "query_type": ask.query_type,
                    "task_execution_state": format!("{:?}", task.execution_state),
                    "stage_count": task.stages.len(),
                }),
                None => json!({"error": "unknown task", "query_type": ask.query_type}),
            };
            if let Some(task) = tasks.get(&ask.sender_task_id) {
                let reply = Message::new(
                    ask.sender_task_id.clone(),
                    "synchronizer".to_string(),
                    vec![ask.sender_id.clone()],
                    answer.to_string(),
                    NO_RELATIVE,
                    false,
                    None,
                    Some(ask.waiting_id.clone()),
                );
                task.enqueue(reply);
            }
        }

        if let Some(agent_instr) = &descriptor.agent_instruction {
            // Concrete agent-manager actions are an excluded skill-body
            // concern (§1); the synchronizer's contract is limited to
            // logging receipt so an agent-manager skill's own follow-up
            // steps (not the synchronizer) carry out the action.
            log::debug!("agent_instruction '{}' from {} received, no core-level effect defined", agent_instr.action, requesting_agent_id);
        }

        drop(tasks);

        if let Some(task_id) = added_task_id {
            self.notify(|o| async move { o.on_task_added(&task_id).await }).await;
        }
        if let Some(event) = completion_event {
            self.notify(|o| {
                let event = event.clone();
                async move { o.on_stage_completion(&event).await }
            })
            .await;
        }
        if let Some(detail) = refusal {
            self.notify(|o| {
                let detail = detail.clone();
                async move { o.on_refused(&detail).await }
            })
            .await;
        }

        Ok(())
    }

    fn apply_task_instruction(
        &self,
        tasks: &mut HashMap<String, Task>,
        instr: &TaskInstruction,
        requesting_agent_id: &str,
        refusal: &mut Option<String>,
    ) -> Option<String> {
        match instr {
            TaskInstruction::AddTask { agent_id, task_intention } => {
                let mut task = Task::new(task_intention.clone(), task_intention.clone(), agent_id.clone(), vec![agent_id.clone()]);
                let task_id = task.task_id.clone();
                let payload = json!({"update_working_memory": {"task_id": task_id, "stage_id": serde_json::Value::Null}});
                let message = Message::instruction(&task_id, agent_id, vec![agent_id.clone()], &payload, NO_RELATIVE);
                task.enqueue(message);
                tasks.insert(task_id.clone(), task);
                return Some(task_id);
            }
            TaskInstruction::AddStage { agent_id, task_id, stages } => {
                let Some(task) = tasks.get_mut(task_id) else {
                    *refusal = Some(format!("add_stage on unknown task {}", task_id));
                    return None;
                };
                if &task.task_manager != agent_id {
                    *refusal = Some(format!("{} is not the task manager of {}", agent_id, task_id));
                    return None;
                }
                for spec in stages {
                    let stage = Stage::new(task_id.clone(), spec.stage_intention.clone(), spec.agent_allocation.clone());
                    let stage_id = stage.stage_id.clone();
                    let receivers: Vec<String> = spec.agent_allocation.keys().cloned().collect();
                    task.add_stage(stage);
                    let payload = json!({"update_working_memory": {"task_id": task_id, "stage_id": stage_id}});
                    let message = Message::instruction(task_id, agent_id, receivers, &payload, NO_RELATIVE);
                    task.enqueue(message);
                }
                None
            }
            TaskInstruction::FinishStage { agent_id, task_id, stage_id } => {
                let Some(task) = tasks.get_mut(task_id) else {
                    *refusal = Some(format!("finish_stage on unknown task {}", task_id));
                    return None;
                };
                if &task.task_manager != agent_id {
                    *refusal = Some(format!("{} is not the task manager of {}", agent_id, task_id));
                    return None;
                }
                if let Some(stage) = task.get_stage_mut(stage_id) {
                    if stage.execution_state != StageExecutionState::Failed {
                        stage.execution_state = StageExecutionState::Finished;
                    }
                }
                match task.current_or_next_stage().map(|s| s.stage_id.clone()) {
                    Some(next_stage_id) => {
                        if let Some(next_stage) = task.get_stage_mut(&next_stage_id) {
                            next_stage.execution_state = StageExecutionState::Running;
                        }
                        let payload = json!({"start_stage": {"stage_id": next_stage_id}});
                        if let Some(next_stage) = task.get_stage(&next_stage_id) {
                            for receiver in next_stage.agent_allocation.keys() {
                                let message = Message::instruction(task_id, agent_id, vec![receiver.clone()], &payload, next_stage_id.clone());
                                task.enqueue(message);
                            }
                        }
                    }
                    None => {
                        task.execution_state = TaskExecutionState::Finished;
                    }
                }
                None
            }
            TaskInstruction::FinishTask { agent_id, task_id } => {
                let Some(task) = tasks.get_mut(task_id) else {
                    *refusal = Some(format!("finish_task on unknown task {}", task_id));
                    return None;
                };
                if &task.task_manager != agent_id {
                    *refusal = Some(format!("{} is not the task manager of {}", agent_id, task_id));
                    return None;
                }
                task.execution_state = TaskExecutionState::Finished;
                let payload = json!({"finish_task": {"task_id": task_id}});
                for member in task.task_group.clone() {
                    let message = Message::instruction(task_id, agent_id, vec![member], &payload, NO_RELATIVE);
                    task.enqueue(message);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::executor::StageSpec;
    use std::collections::HashMap as Map;

    fn alloc(agents: &[&str]) -> Map<String, String> {
        agents.iter().map(|a| (a.to_string(), "goal".into())).collect()
    }

    #[tokio::test]
    async fn add_task_registers_and_notifies_creator() {
        let sync = Synchronizer::new(None);
        let descriptor = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::AddTask { agent_id: "mgr".into(), task_intention: "ship it".into() }),
            ..Default::default()
        };
        sync.apply(descriptor, "mgr").await.unwrap();
        let all = sync.snapshot_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].task_manager, "mgr");
    }

    struct RecordingObserver {
        added: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SynchronizerObserver for RecordingObserver {
        async fn on_task_added(&self, task_id: &str) {
            self.added.lock().await.push(task_id.to_string());
        }
    }

    #[tokio::test]
    async fn add_task_instruction_notifies_on_task_added() {
        let observer = Arc::new(RecordingObserver { added: tokio::sync::Mutex::new(Vec::new()) });
        let sync = Synchronizer::new(Some(observer.clone()));
        let descriptor = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::AddTask { agent_id: "mgr".into(), task_intention: "ship it".into() }),
            ..Default::default()
        };
        sync.apply(descriptor, "mgr").await.unwrap();
        let all = sync.snapshot_all().await;
        let added = observer.added.lock().await;
        assert_eq!(added.as_slice(), [all[0].task_id.clone()]);
    }

    #[tokio::test]
    async fn finish_stage_starts_next_stage_in_order() {
        let sync = Synchronizer::new(None);
        let task = Task::new("ship", "ship it", "mgr", vec!["mgr".into(), "a".into()]);
        let task_id = sync.add_task(task).await;

        let add_stages = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::AddStage {
                agent_id: "mgr".into(),
                task_id: task_id.clone(),
                stages: vec![
                    StageSpec { stage_intention: "s1".into(), agent_allocation: alloc(&["a"]) },
                    StageSpec { stage_intention: "s2".into(), agent_allocation: alloc(&["a"]) },
                ],
            }),
            ..Default::default()
        };
        sync.apply(add_stages, "mgr").await.unwrap();

        let snap = sync.get_task_snapshot(&task_id).await.unwrap();
        let s1_id = snap.stages[0].stage_id.clone();
        let s2_id = snap.stages[1].stage_id.clone();

        let finish = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::FinishStage { agent_id: "mgr".into(), task_id: task_id.clone(), stage_id: s1_id }),
            ..Default::default()
        };
        sync.apply(finish, "mgr").await.unwrap();

        let snap = sync.get_task_snapshot(&task_id).await.unwrap();
        assert_eq!(snap.stages[0].execution_state, StageExecutionState::Finished);
        let s2 = snap.stages.iter().find(|s| s.stage_id == s2_id).unwrap();
        assert_eq!(s2.execution_state, StageExecutionState::Running);
    }

    #[tokio::test]
    async fn non_manager_cannot_finish_stage() {
        let sync = Synchronizer::new(None);
        let task = Task::new("ship", "ship it", "mgr", vec!["mgr".into()]);
        let task_id = sync.add_task(task).await;
        let add_stage = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::AddStage {
                agent_id: "mgr".into(),
                task_id: task_id.clone(),
                stages: vec![StageSpec { stage_intention: "s1".into(), agent_allocation: alloc(&["a"]) }],
            }),
            ..Default::default()
        };
        sync.apply(add_stage, "mgr").await.unwrap();
        let snap = sync.get_task_snapshot(&task_id).await.unwrap();
        let stage_id = snap.stages[0].stage_id.clone();

        let finish = SideEffectDescriptor {
            task_instruction: Some(TaskInstruction::FinishStage { agent_id: "intruder".into(), task_id: task_id.clone(), stage_id: stage_id.clone() }),
            ..Default::default()
        };
        sync.apply(finish, "intruder").await.unwrap();
        let snap = sync.get_task_snapshot(&task_id).await.unwrap();
        assert_eq!(snap.stages[0].execution_state, StageExecutionState::Init);
    }
}
