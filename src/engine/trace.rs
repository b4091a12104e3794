//! Execution trace: what happened, step by step.
//!
//! Events are recorded as they happen and rendered to one human-readable
//! line each. The buffer is bounded; once full, the oldest event is dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Started {
        agent: String,
        version: String,
        at: DateTime<Utc>,
    },
    StepSkipped {
        step_id: String,
        condition: String,
        at: DateTime<Utc>,
    },
    StepCompleted {
        step_id: String,
        /// `true` when a `when` guard was evaluated, `None` when there was none.
        condition: Option<bool>,
        attempts: u32,
        duration_ms: u64,
        saved_as: Option<String>,
        at: DateTime<Utc>,
    },
    StepFailed {
        step_id: String,
        attempts: u32,
        duration_ms: u64,
        error: String,
        at: DateTime<Utc>,
    },
    /// Session paused before `step_id`, or at `@end` when `None`.
    Paused {
        step_id: Option<String>,
        at: DateTime<Utc>,
    },
    Resumed {
        at: DateTime<Utc>,
    },
    VariableSet {
        name: String,
        at: DateTime<Utc>,
    },
    Finished {
        success: bool,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    Stopped {
        at: DateTime<Utc>,
    },
}

impl TraceEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            TraceEvent::Started { at, .. }
            | TraceEvent::StepSkipped { at, .. }
            | TraceEvent::StepCompleted { at, .. }
            | TraceEvent::StepFailed { at, .. }
            | TraceEvent::Paused { at, .. }
            | TraceEvent::Resumed { at }
            | TraceEvent::VariableSet { at, .. }
            | TraceEvent::Finished { at, .. }
            | TraceEvent::Stopped { at } => *at,
        }
    }

    /// The step this event is about, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            TraceEvent::StepSkipped { step_id, .. }
            | TraceEvent::StepCompleted { step_id, .. }
            | TraceEvent::StepFailed { step_id, .. } => Some(step_id),
            TraceEvent::Paused { step_id, .. } => step_id.as_deref(),
            _ => None,
        }
    }

    pub fn line(&self) -> String {
        let ts = self.at().format("%H:%M:%S%.3f");
        let body = match self {
            TraceEvent::Started { agent, version, .. } => {
                format!("started agent '{}' ({})", agent, version)
            }
            TraceEvent::StepSkipped {
                step_id, condition, ..
            } => format!("step '{}' skipped: `{}` was false", step_id, condition),
            TraceEvent::StepCompleted {
                step_id,
                condition,
                attempts,
                duration_ms,
                saved_as,
                ..
            } => {
                let mut line = format!(
                    "step '{}' completed in {}ms ({})",
                    step_id,
                    duration_ms,
                    plural_attempts(*attempts)
                );
                if condition == &Some(true) {
                    line.push_str(", condition true");
                }
                if let Some(name) = saved_as {
                    line.push_str(&format!(" -> {}", name));
                }
                line
            }
            TraceEvent::StepFailed {
                step_id,
                attempts,
                duration_ms,
                error,
                ..
            } => format!(
                "step '{}' failed after {}ms ({}): {}",
                step_id,
                duration_ms,
                plural_attempts(*attempts),
                error
            ),
            TraceEvent::Paused {
                step_id: Some(step_id),
                ..
            } => format!("paused before step '{}'", step_id),
            TraceEvent::Paused { step_id: None, .. } => "paused at @end".to_string(),
            TraceEvent::Resumed { .. } => "resumed".to_string(),
            TraceEvent::VariableSet { name, .. } => format!("variable '{}' set", name),
            TraceEvent::Finished {
                success,
                duration_ms,
                ..
            } => format!(
                "finished {} in {}ms",
                if *success { "successfully" } else { "with failure" },
                duration_ms
            ),
            TraceEvent::Stopped { .. } => "stopped".to_string(),
        };
        format!("[{}] {}", ts, body)
    }
}

fn plural_attempts(n: u32) -> String {
    if n == 1 {
        "1 attempt".to_string()
    } else {
        format!("{} attempts", n)
    }
}

/// Bounded, ordered event log for one execution or session.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    events: VecDeque<TraceEvent>,
    max_events: usize,
    dropped: usize,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Trace {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: TraceEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.back()
    }

    /// Rendered lines, oldest first. A leading marker notes dropped events.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.events.len() + 1);
        if self.dropped > 0 {
            lines.push(format!("... {} earlier event(s) dropped", self.dropped));
        }
        lines.extend(self.events.iter().map(TraceEvent::line));
        lines
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
