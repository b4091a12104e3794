//! agentflow - declarative multi-step AI agents
//!
//! Describe an agent in a small indentation-based text format, then run it
//! against live input. Each step is dispatched to a pluggable capability
//! backend (LLM, vision, HTTP, vector search, ...).
//!
//! - **DSL**: lexer, indentation tree, parser and validation with line/column
//!   diagnostics
//! - **Templates & conditions**: `{name.path}` placeholders and `when` guards
//! - **Capabilities**: `(kind, provider)` registry of async backends
//! - **Engine**: sequential execution with per-attempt timeouts and retries
//! - **Sessions**: pausable debug runs with breakpoints and variable edits
//!
//! # Quick Start
//!
//! ```ignore
//! use agentflow::{dsl, CapabilityRegistry, EchoCapability, Engine};
//! use std::sync::Arc;
//!
//! let definition = dsl::parse(source).into_valid()?;
//! let registry = Arc::new(CapabilityRegistry::new());
//! registry.register("llm", None, EchoCapability);
//! let output = Engine::new(registry)
//!     .execute(&definition, serde_json::json!({"name": "Ada"}))
//!     .await?;
//! ```

// ─── Source format ────────────────────────────────────────────────
pub mod dsl;

// ─── Evaluation ───────────────────────────────────────────────────
pub mod condition;
pub mod template;

// ─── Execution ────────────────────────────────────────────────────
pub mod capability;
pub mod engine;
pub mod retry;
pub mod session;

// ─── Infrastructure ───────────────────────────────────────────────
pub mod config;
pub mod errors;
pub mod observability;
pub mod redact;

pub use capability::{
    Capability, CapabilityKey, CapabilityRegistry, CapabilityRequest, ConstantCapability,
    EchoCapability,
};
pub use config::{EngineConfig, FailurePolicy};
pub use dsl::{parse, AgentDefinition, Diagnostic, ParseOutput, Severity, ValidationResult};
pub use engine::{BindingTable, Engine, ExecutionReport, SecretResolver, StaticSecrets, Trace};
pub use errors::{AgentflowError, ExecutionError, Result, SessionError};
pub use session::{SessionId, SessionRegistry, SessionState, SessionStatus, END_BREAKPOINT};
pub use template::MissingVariablePolicy;
