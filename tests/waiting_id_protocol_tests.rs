//! Cross-component tests for the waiting-ID request/response protocol
//! (scenario 2: send-message-and-wait; scenario 6: parallel ask-info).
//! Drives the real `send_message`/`ask_info`/`planning` skills from
//! `mas_core::mas::skills::build_registry` through the dispatcher and
//! synchronizer, observing only the public `Mas::snapshot()` surface — the
//! same surface an operator console or a state monitor would use.

use async_trait::async_trait;
use mas_core::mas::error::TransportError;
use mas_core::mas::external::{LLMClient, MCPClient, ToolCapabilityCatalog, ToolCapabilityKind};
use mas_core::mas::skills::build_registry;
use mas_core::{AgentConfig, AgentSnapshot, Mas, MasConfig, WorkingState, NO_STAGE};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> MasConfig {
    MasConfig { worker_poll_interval: Duration::from_millis(15), dispatcher_poll_interval: Duration::from_millis(15), planning_retry_limit: 1 }
}

struct StubMCP;

#[async_trait]
impl MCPClient for StubMCP {
    async fn list_capabilities(&self, _server_name: &str) -> Result<ToolCapabilityCatalog, TransportError> {
        Ok(ToolCapabilityCatalog { prompts: vec![], resources: vec![], tools: vec![] })
    }
    async fn invoke(&self, _server_name: &str, _kind: ToolCapabilityKind, _capability_name: &str, _arguments: serde_json::Value) -> Result<serde_json::Value, TransportError> {
        Ok(serde_json::Value::Null)
    }
}

struct ScriptedLLM {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ScriptedLLM {
    fn new(scripts: &[(&str, &[&str])]) -> Self {
        let mut queues = HashMap::new();
        for (context, responses) in scripts {
            queues.insert(context.to_string(), responses.iter().map(|s| s.to_string()).collect());
        }
        Self { queues: Mutex::new(queues) }
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn call(&self, _prompt: &str, context: &str) -> Result<String, TransportError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(context.to_string()).or_default();
        queue.pop_front().ok_or_else(|| TransportError { detail: format!("no more scripted responses for context {}", context) })
    }
    fn model_name(&self) -> &str {
        "scripted"
    }
}

async fn poll_agent_until(mas: &Mas, agent_id: &str, attempts: u32, mut check: impl FnMut(&AgentSnapshot) -> bool) -> AgentSnapshot {
    for _ in 0..attempts {
        let snapshot = mas.snapshot().await;
        if let Some(agent) = snapshot.agents.iter().find(|a| a.agent_id == agent_id) {
            if check(agent) {
                return agent.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    mas.snapshot().await.agents.into_iter().find(|a| a.agent_id == agent_id).expect("agent must be registered")
}

#[tokio::test]
async fn send_message_with_waiting_locks_and_unlocks_across_a_reply() {
    let registry = build_registry(fast_config(), Arc::new(StubMCP));
    let mas = Mas::new(registry, fast_config(), None).await;

    let a1_llm = Arc::new(ScriptedLLM::new(&[
        (
            "planning",
            &[r#"<planned_step>[{"step_intention":"tell b1","type":"skill","executor":"send_message","text_content":"let b1 know the plan"}]</planned_step>"#],
        ),
        (
            "send_message",
            &[r#"<send_message_step>{"action":"send","receiver":["b1"],"message":"please confirm","need_reply":true,"waiting":true}</send_message_step>"#],
        ),
    ]));
    let b1_llm = Arc::new(ScriptedLLM::new(&[(
        "send_message",
        &[r#"<send_message_step>{"action":"send","receiver":["a1"],"message":""}</send_message_step>"#],
    )]));

    let mut a1_skills = HashSet::new();
    a1_skills.extend(["planning".to_string(), "send_message".to_string()]);
    mas.register_agent(AgentConfig {
        agent_id: "a1".into(),
        name: "Alice".into(),
        role: "worker".into(),
        profile: "".into(),
        tools: HashSet::new(),
        skills: a1_skills,
        llm: a1_llm,
    })
    .await
    .unwrap();

    let mut b1_skills = HashSet::new();
    b1_skills.insert("send_message".to_string());
    mas.register_agent(AgentConfig {
        agent_id: "b1".into(),
        name: "Bob".into(),
        role: "worker".into(),
        profile: "".into(),
        tools: HashSet::new(),
        skills: b1_skills,
        llm: b1_llm,
    })
    .await
    .unwrap();

    mas.start().await;
    let task_id = mas.create_task("coordinate", "coordinate work", "a1").await;

    let a1 = mas.get_agent("a1").await.unwrap();
    a1.seed_planning_step(&task_id, NO_STAGE).await;

    let locked = poll_agent_until(&mas, "a1", 80, |a| a.step_lock.len() == 1).await;
    assert_eq!(locked.step_lock.len(), 1, "a1 should hold exactly one waiting id after the waiting send completes");

    let unlocked = poll_agent_until(&mas, "a1", 150, |a| a.step_lock.is_empty()).await;
    assert!(unlocked.step_lock.is_empty(), "b1's reply carrying return_waiting_id must close a1's waiting id");
    assert_ne!(unlocked.working_state, WorkingState::Waiting, "a1 must not still be parked on a closed waiting id");

    mas.shutdown().await;
}

#[tokio::test]
async fn two_agents_ask_info_in_parallel_lock_and_unlock_independently() {
    let registry = build_registry(fast_config(), Arc::new(StubMCP));
    let mas = Mas::new(registry, fast_config(), None).await;

    let a1_llm = Arc::new(ScriptedLLM::new(&[
        (
            "planning",
            &[r#"<planned_step>[{"step_intention":"ask status","type":"skill","executor":"ask_info","text_content":"what's the task status?"}]</planned_step>"#],
        ),
        ("ask_info", &[r#"<ask_info_step>{"query_type":"stage_status","extra":{"who":"a1"}}</ask_info_step>"#]),
    ]));
    let a2_llm = Arc::new(ScriptedLLM::new(&[
        (
            "planning",
            &[r#"<planned_step>[{"step_intention":"ask status","type":"skill","executor":"ask_info","text_content":"what's the task status?"}]</planned_step>"#],
        ),
        ("ask_info", &[r#"<ask_info_step>{"query_type":"stage_status","extra":{"who":"a2"}}</ask_info_step>"#]),
    ]));

    let mut skills = HashSet::new();
    skills.extend(["planning".to_string(), "ask_info".to_string()]);
    mas.register_agent(AgentConfig {
        agent_id: "a1".into(),
        name: "Alice".into(),
        role: "worker".into(),
        profile: "".into(),
        tools: HashSet::new(),
        skills: skills.clone(),
        llm: a1_llm,
    })
    .await
    .unwrap();
    mas.register_agent(AgentConfig {
        agent_id: "a2".into(),
        name: "Amy".into(),
        role: "worker".into(),
        profile: "".into(),
        tools: HashSet::new(),
        skills,
        llm: a2_llm,
    })
    .await
    .unwrap();

    mas.start().await;
    let task_id = mas.create_task("coordinate", "coordinate work", "a1").await;

    let a1 = mas.get_agent("a1").await.unwrap();
    let a2 = mas.get_agent("a2").await.unwrap();
    a1.seed_planning_step(&task_id, NO_STAGE).await;
    a2.seed_planning_step(&task_id, NO_STAGE).await;

    let a1_locked = poll_agent_until(&mas, "a1", 80, |a| a.step_lock.len() == 1).await;
    let a2_locked = poll_agent_until(&mas, "a2", 80, |a| a.step_lock.len() == 1).await;
    assert_ne!(a1_locked.step_lock[0], a2_locked.step_lock[0], "independent ask_info calls must mint distinct waiting ids");

    let a1_unlocked = poll_agent_until(&mas, "a1", 150, |a| a.step_lock.is_empty()).await;
    let a2_unlocked = poll_agent_until(&mas, "a2", 150, |a| a.step_lock.is_empty()).await;
    assert!(a1_unlocked.step_lock.is_empty());
    assert!(a2_unlocked.step_lock.is_empty());

    mas.shutdown().await;
}
