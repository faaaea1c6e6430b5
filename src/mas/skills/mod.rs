//! Skill executors (§4.8): the concrete `Executor` implementations for the
//! core skill contract surface. Each module owns one skill; `support`
//! holds the tag-extraction helpers every skill shares.

pub mod agent_manager;
pub mod ask_info;
pub mod decision;
pub mod instruction_generation;
pub mod planning;
pub mod process_message;
pub mod reflection;
pub mod send_message;
pub mod summary;
pub mod support;
pub mod task_manager;
pub mod tool_decision;

use crate::mas::config::MasConfig;
use crate::mas::executor::ExecutorRegistry;
use crate::mas::external::MCPClient;
use crate::mas::step::StepKind;
use crate::mas::tool::GenericToolExecutor;
use std::sync::Arc;

/// Builds the registry every `Mas` supervisor runs with: every skill named
/// in the core skill contract, plus the generic tool executor wired to
/// `mcp`. Applications that need a reduced skill set (an agent with no
/// `task_manager`, say) build their own registry from
/// [`crate::mas::executor::ExecutorRegistry::builder`] instead of this
/// helper; it exists for the common "all skills" case.
pub fn build_registry(config: MasConfig, mcp: Arc<dyn MCPClient>) -> ExecutorRegistry {
    ExecutorRegistry::builder()
        .register(StepKind::Skill, "planning", Arc::new(planning::PlanningSkill::new(config.clone())))
        .register(StepKind::Skill, "reflection", Arc::new(reflection::ReflectionSkill))
        .register(StepKind::Skill, "decision", Arc::new(decision::DecisionSkill))
        .register(StepKind::Skill, "process_message", Arc::new(process_message::ProcessMessageSkill))
        .register(StepKind::Skill, "send_message", Arc::new(send_message::SendMessageSkill))
        .register(StepKind::Skill, "ask_info", Arc::new(ask_info::AskInfoSkill))
        .register(StepKind::Skill, "task_manager", Arc::new(task_manager::TaskManagerSkill))
        .register(StepKind::Skill, "agent_manager", Arc::new(agent_manager::AgentManagerSkill))
        .register(StepKind::Skill, "instruction_generation", Arc::new(instruction_generation::InstructionGenerationSkill))
        .register(StepKind::Skill, "tool_decision", Arc::new(tool_decision::ToolDecisionSkill))
        .register(StepKind::Skill, "summary", Arc::new(summary::SummarySkill))
        .register(StepKind::Tool, crate::mas::executor::GENERIC_TOOL_HANDLER, Arc::new(GenericToolExecutor::new(mcp)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::error::TransportError;
    use crate::mas::external::{ToolCapabilityCatalog, ToolCapabilityKind};
    use async_trait::async_trait;

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

    #[test]
    fn build_registry_resolves_every_named_skill_and_the_tool_handler() {
        let registry = build_registry(MasConfig::default(), Arc::new(StubMCP));
        for name in [
            "planning",
            "reflection",
            "decision",
            "process_message",
            "send_message",
            "ask_info",
            "task_manager",
            "agent_manager",
            "instruction_generation",
            "tool_decision",
            "summary",
        ] {
            assert!(registry.resolve(StepKind::Skill, name).is_ok(), "missing skill: {}", name);
        }
        assert!(registry.resolve(StepKind::Tool, "any-server").is_ok());
    }
}
