//! External collaborators consumed by the core but not implemented by it:
//! the LLM client and the tool-server client. Only their interfaces are in
//! scope; transport, prompt templates, and role configuration loading live
//! outside this crate.

use crate::mas::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;

/// A bounded conversation context an `LLMClient` call reads from and can be
/// cleared between skill invocations: the core only needs a
/// synchronous-looking call site, even though a real implementation is
/// async underneath.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Invokes the model with `prompt` against `context`, returning its raw
    /// text response.
    async fn call(&self, prompt: &str, context: &str) -> Result<String, TransportError>;

    /// A human-readable name for logging (model name, deployment alias).
    fn model_name(&self) -> &str;
}

/// Capability catalog returned by `list_capabilities` (the tool executor's
/// `get_description` instruction).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCapabilityCatalog {
    pub prompts: Vec<String>,
    pub resources: Vec<String>,
    pub tools: Vec<String>,
}

/// Which kind of capability `invoke` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCapabilityKind {
    Tool,
    Resource,
    Prompt,
}

/// The tool-server client: supports listing a server's capability catalog
/// and invoking a named capability, both safely callable concurrently from
/// multiple agents. The MCP multiplexing/async event-loop machinery behind
/// a real implementation is explicitly out of scope; the generic tool
/// executor only needs this façade.
#[async_trait]
pub trait MCPClient: Send + Sync {
    async fn list_capabilities(&self, server_name: &str) -> Result<ToolCapabilityCatalog, TransportError>;

    async fn invoke(
        &self,
        server_name: &str,
        kind: ToolCapabilityKind,
        capability_name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError>;
}
