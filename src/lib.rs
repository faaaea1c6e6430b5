// src/lib.rs

// Import the top-level `mas` module.
pub mod mas;

// Re-exporting key items for easier external access.
pub use mas::agent::{AgentRuntime, AgentSnapshot};
pub use mas::agent_state::{AgentState, WorkingState};
pub use mas::config::MasConfig;
pub use mas::error::MasError;
pub use mas::executor::{Executor, ExecutorRegistry, SideEffectDescriptor};
pub use mas::external::{LLMClient, MCPClient};
pub use mas::message::Message;
pub use mas::step::{Step, StepKind, StepStatus, NO_STAGE};
pub use mas::supervisor::{AgentConfig, Mas, MasSnapshot, OperatorConfig};
pub use mas::synchronizer::{StageSnapshot, SynchronizerObserver, TaskSnapshot};
pub use mas::task::Task;
