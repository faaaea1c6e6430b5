//! The generic tool executor (§4.9): the single registry entry every `Tool`
//! step resolves to (see [`crate::mas::executor::GENERIC_TOOL_HANDLER`]),
//! dispatching by the step's own `executor_name` (the target MCP server)
//! rather than by a per-server registration.
//!
//! Mirrors the `ToolRegistry` pattern of one shared client multiplexing
//! calls to many named servers: this executor multiplexes
//! `instruction_content` dispatch over a single `MCPClient`.
//!
//! Every successful call appends-next a `tool_decision` step (grounded on
//! `mas/skills/tool_decision.py`'s "long-tail" loop): the tool executor
//! itself never knows whether a call needs a follow-up, so it always hands
//! the result to tool-decision, which is the one place that decides whether
//! the loop continues or stops.

use crate::mas::agent_state::AgentState;
use crate::mas::error::{MasError, ParseError};
use crate::mas::executor::{Executor, SideEffectDescriptor};
use crate::mas::external::{MCPClient, ToolCapabilityKind};
use crate::mas::message::Message;
use crate::mas::step::StepStatus;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves a `function_call` instruction's capability name/kind from
/// whichever of `tool_name`/`resource_name`/`prompt_name` is present.
fn parse_capability(instruction: &serde_json::Value) -> Option<(ToolCapabilityKind, String)> {
    if let Some(name) = instruction.get("tool_name").and_then(|v| v.as_str()) {
        return Some((ToolCapabilityKind::Tool, name.to_string()));
    }
    if let Some(name) = instruction.get("resource_name").and_then(|v| v.as_str()) {
        return Some((ToolCapabilityKind::Resource, name.to_string()));
    }
    if let Some(name) = instruction.get("prompt_name").and_then(|v| v.as_str()) {
        return Some((ToolCapabilityKind::Prompt, name.to_string()));
    }
    None
}

/// Executes every `Tool`-kind step regardless of which server it names.
/// The step's `instruction_content` (populated by instruction-generation,
/// §4.8) carries the actual request; a step that reaches this executor
/// still `pending` (no instruction yet) fails rather than panicking, since
/// a skill body could in principle queue a bare tool step directly.
pub struct GenericToolExecutor {
    mcp: Arc<dyn MCPClient>,
}

impl GenericToolExecutor {
    pub fn new(mcp: Arc<dyn MCPClient>) -> Self {
        Self { mcp }
    }

    fn queue_tool_decision(agent_id: &str, task_id: &str, stage_id: &str, tool_name: &str) -> Message {
        let payload = serde_json::json!({"add_tool_decision": {"tool_name": tool_name}});
        Message::instruction(task_id, agent_id, vec![agent_id.to_string()], &payload, stage_id)
    }
}

#[async_trait]
impl Executor for GenericToolExecutor {
    fn describe(&self) -> &str {
        "Invokes tools, resources, and prompts on a named MCP server."
    }

    async fn execute(&self, step_id: &str, agent_state: &mut AgentState) -> Result<SideEffectDescriptor, MasError> {
        let (task_id, stage_id, server_name, instruction) = {
            let step = agent_state.agent_step.get(step_id).expect("step exists for its own executor");
            (step.task_id.clone(), step.stage_id.clone(), step.executor_name.clone(), step.instruction_content.clone())
        };

        let Some(instruction) = instruction else {
            if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                step.status = StepStatus::Failed;
                step.execute_result = Some(serde_json::json!({"error": "tool step has no instruction_content"}));
            }
            return Err(ParseError { step_id: step_id.to_string(), detail: "tool step reached execution without an instruction".into() }.into());
        };

        let instruction_type = instruction.get("instruction_type").and_then(|v| v.as_str()).unwrap_or("");

        let outcome = match instruction_type {
            "get_description" => self.mcp.list_capabilities(&server_name).await.map(|catalog| serde_json::json!(catalog)),
            "function_call" => {
                let arguments = instruction.get("arguments").cloned().unwrap_or(serde_json::Value::Null);
                match parse_capability(&instruction) {
                    Some((kind, capability_name)) => {
                        self.mcp.invoke(&server_name, kind, &capability_name, arguments).await.map(|result| serde_json::json!({"mcp_server_result": result}))
                    }
                    None => {
                        if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                            step.status = StepStatus::Failed;
                            step.execute_result = Some(serde_json::json!({"error": "function_call missing tool_name/resource_name/prompt_name", "instruction": instruction}));
                        }
                        return Ok(SideEffectDescriptor::default());
                    }
                }
            }
            other => {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"error": format!("unrecognized instruction_type '{}'", other)}));
                }
                return Ok(SideEffectDescriptor::default());
            }
        };

        let mut descriptor = SideEffectDescriptor::default();

        match outcome {
            Ok(value) => {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Finished;
                    step.execute_result = Some(value);
                }
                descriptor.send_message = Some(Self::queue_tool_decision(&agent_state.agent_id, &task_id, &stage_id, &server_name));
            }
            Err(err) => {
                if let Some(step) = agent_state.agent_step.get_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.execute_result = Some(serde_json::json!({"error": err.to_string()}));
                }
            }
        }

        Ok(descriptor)
    }
}
