//! Pausable debug sessions.
//!
//! A session owns its own binding table and walks the definition one step
//! at a time, pausing *before* any step with a breakpoint. The special
//! breakpoint [`END_BREAKPOINT`] pauses after the last step, before outputs
//! are rendered, so the final bindings can be inspected or edited.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::dsl::AgentDefinition;
use crate::engine::{BindingTable, Trace};
use crate::redact;

pub mod registry;

pub use registry::SessionRegistry;

/// Breakpoint that pauses once every step has run.
pub const END_BREAKPOINT: &str = "@end";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
    Running,
    PausedAtBreakpoint,
    PausedAtEnd,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn can_continue(&self) -> bool {
        matches!(
            self,
            SessionStatus::Ready | SessionStatus::PausedAtBreakpoint | SessionStatus::PausedAtEnd
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::PausedAtBreakpoint => "paused_at_breakpoint",
            SessionStatus::PausedAtEnd => "paused_at_end",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One debug session. Owned by a [`SessionRegistry`] behind a mutex.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) definition: Arc<AgentDefinition>,
    pub(crate) bindings: BindingTable,
    pub(crate) breakpoints: BTreeSet<String>,
    /// Index of the next step to run.
    pub(crate) cursor: usize,
    pub(crate) status: SessionStatus,
    pub(crate) trace: Trace,
    pub(crate) last_saved: Option<Value>,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: Instant,
}

impl Session {
    pub(crate) fn new(
        definition: Arc<AgentDefinition>,
        bindings: BindingTable,
        max_trace_events: usize,
    ) -> Self {
        Self {
            id: SessionId::new(),
            definition,
            bindings,
            breakpoints: BTreeSet::new(),
            cursor: 0,
            status: SessionStatus::Ready,
            trace: Trace::new(max_trace_events),
            last_saved: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The step the cursor points at, if any remain.
    pub fn next_step(&self) -> Option<&str> {
        self.definition.steps.get(self.cursor).map(|s| s.id.as_str())
    }

    /// Snapshot safe to hand to a user: secrets are masked.
    pub fn state(&self) -> SessionState {
        let result = self.result.clone().map(|mut value| {
            redact::mask_json(&mut value, &self.bindings.secret_values());
            value
        });
        SessionState {
            id: self.id,
            agent: self.definition.id.clone(),
            version: self.definition.version.clone(),
            status: self.status,
            cursor: self.cursor,
            next_step: self.next_step().map(str::to_string),
            breakpoints: self.breakpoints.iter().cloned().collect(),
            bindings: self.bindings.masked(),
            result,
            error: self.error.clone(),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub id: SessionId,
    pub agent: String,
    pub version: String,
    pub status: SessionStatus,
    pub cursor: usize,
    pub next_step: Option<String>,
    pub breakpoints: Vec<String>,
    pub bindings: Map<String, Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
