//! Error taxonomy for the MAS runtime.
//!
//! Matches the reference crate's manual `Display` + `Error` idiom rather than
//! pulling in `thiserror`: every leaf error is a plain enum, and [`MasError`]
//! unions them with `From` conversions so `?` works across subsystem
//! boundaries.

use std::error::Error;
use std::fmt;

/// Fatal-at-startup configuration faults: an unknown executor, a missing
/// role config, a duplicate agent ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownExecutor { kind: String, name: String },
    DuplicateAgent { agent_id: String },
    MissingRoleConfig { agent_id: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownExecutor { kind, name } => {
                write!(f, "no executor registered for ({}, {})", kind, name)
            }
            ConfigError::DuplicateAgent { agent_id } => {
                write!(f, "agent '{}' is already registered", agent_id)
            }
            ConfigError::MissingRoleConfig { agent_id } => {
                write!(f, "agent '{}' has no role configuration", agent_id)
            }
        }
    }
}

impl Error for ConfigError {}

/// Step-level failure: the LLM's response did not contain the required
/// tagged block, or the block did not parse as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub step_id: String,
    pub detail: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: parse error: {}", self.step_id, self.detail)
    }
}

impl Error for ParseError {}

/// A planned step targets an executor outside the agent's whitelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionError {
    pub agent_id: String,
    pub executor_name: String,
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "agent '{}' is not whitelisted for executor '{}'",
            self.agent_id, self.executor_name
        )
    }
}

impl Error for PermissionError {}

/// LLM or tool RPC failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub detail: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.detail)
    }
}

impl Error for TransportError {}

/// Malformed message envelope or unknown instruction key; the message is
/// dropped and the fault logged, not propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub detail: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.detail)
    }
}

impl Error for ProtocolError {}

/// A stage/task transition was attempted that the current state does not
/// allow (e.g. `start_stage` on an unknown stage). The synchronizer logs and
/// refuses the transition; the task itself is not corrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLogicError {
    pub task_id: String,
    pub detail: String,
}

impl fmt::Display for StageLogicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}: stage logic error: {}", self.task_id, self.detail)
    }
}

impl Error for StageLogicError {}

/// Union of every subsystem error, so call sites that cross subsystem
/// boundaries can propagate with `?` without picking a specific leaf type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasError {
    Config(ConfigError),
    Parse(ParseError),
    Permission(PermissionError),
    Transport(TransportError),
    Protocol(ProtocolError),
    StageLogic(StageLogicError),
}

impl fmt::Display for MasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasError::Config(e) => write!(f, "{}", e),
            MasError::Parse(e) => write!(f, "{}", e),
            MasError::Permission(e) => write!(f, "{}", e),
            MasError::Transport(e) => write!(f, "{}", e),
            MasError::Protocol(e) => write!(f, "{}", e),
            MasError::StageLogic(e) => write!(f, "{}", e),
        }
    }
}

impl Error for MasError {}

impl From<ConfigError> for MasError {
    fn from(e: ConfigError) -> Self {
        MasError::Config(e)
    }
}

impl From<ParseError> for MasError {
    fn from(e: ParseError) -> Self {
        MasError::Parse(e)
    }
}

impl From<PermissionError> for MasError {
    fn from(e: PermissionError) -> Self {
        MasError::Permission(e)
    }
}

impl From<TransportError> for MasError {
    fn from(e: TransportError) -> Self {
        MasError::Transport(e)
    }
}

impl From<ProtocolError> for MasError {
    fn from(e: ProtocolError) -> Self {
        MasError::Protocol(e)
    }
}

impl From<StageLogicError> for MasError {
    fn from(e: StageLogicError) -> Self {
        MasError::StageLogic(e)
    }
}
