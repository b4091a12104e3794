use thiserror::Error;

use crate::dsl::ValidationResult;

/// The central error type for agentflow.
///
/// Parse problems never show up here: `dsl::parse` reports them as
/// diagnostics. This hierarchy covers what can go wrong once a definition
/// is handed to the engine or to a debug session.
#[derive(Error, Debug)]
pub enum AgentflowError {
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fatal errors raised while executing an agent definition.
///
/// Every variant that happens inside a step names that step. Configuration
/// errors are never retried; `StepFailed` and `StepTimedOut` are only
/// surfaced once the step's retry budget is exhausted.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("missing required variable '{name}' (no input and no default)")]
    MissingVariable { name: String },

    #[error("secret '{name}' could not be resolved from '{source_ref}'")]
    MissingSecret { name: String, source_ref: String },

    #[error("step '{step_id}': no capability registered for kind={kind} provider={provider}")]
    NoCapability {
        step_id: String,
        kind: String,
        provider: String,
    },

    #[error("step '{step_id}' timed out after {timeout_ms}ms ({attempts} attempt(s))")]
    StepTimedOut {
        step_id: String,
        timeout_ms: u64,
        attempts: u32,
    },

    #[error("step '{step_id}' failed after {attempts} attempt(s): {cause}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        cause: String,
    },
}

impl ExecutionError {
    /// The failing step, when the error happened inside one.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionError::MissingVariable { .. } | ExecutionError::MissingSecret { .. } => None,
            ExecutionError::NoCapability { step_id, .. }
            | ExecutionError::StepTimedOut { step_id, .. }
            | ExecutionError::StepFailed { step_id, .. } => Some(step_id),
        }
    }

    /// Number of dispatch attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::StepTimedOut { attempts, .. }
            | ExecutionError::StepFailed { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Configuration errors abort immediately and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExecutionError::MissingVariable { .. }
                | ExecutionError::MissingSecret { .. }
                | ExecutionError::NoCapability { .. }
        )
    }
}

/// Errors from the debug session registry.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("agent source has {} error(s); first: {}", .0.errors.len(), first_error(.0))]
    InvalidSource(ValidationResult),

    #[error("step '{step_id}' does not exist in agent '{agent}'")]
    UnknownStep { agent: String, step_id: String },

    #[error("cannot {action} while session is {status}")]
    InvalidState { action: String, status: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

fn first_error(validation: &ValidationResult) -> String {
    validation
        .errors
        .first()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "no recognizable agent structure".to_string())
}

pub type Result<T> = std::result::Result<T, AgentflowError>;
