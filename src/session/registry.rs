//! Session registry: owns every live debug session.
//!
//! The map itself sits behind a `parking_lot::RwLock` that is only held
//! long enough to clone a session handle; each session is guarded by its
//! own `tokio::sync::Mutex`, so different sessions run concurrently while
//! operations on one session are serialized.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dsl::{self, AgentDefinition};
use crate::engine::{Engine, StepOutcome, TraceEvent};
use crate::errors::SessionError;
use crate::observability::telemetry;

use super::{Session, SessionId, SessionState, SessionStatus, END_BREAKPOINT};

type SessionHandle = Arc<Mutex<Session>>;

pub struct SessionRegistry {
    engine: Arc<Engine>,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn handle(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Parse `source` and open a session over it. Nothing runs until
    /// [`continue_session`](Self::continue_session).
    pub fn start(&self, source: &str, input: Value) -> Result<SessionId, SessionError> {
        let definition = dsl::parse(source)
            .into_valid()
            .map_err(SessionError::InvalidSource)?;
        self.start_definition(Arc::new(definition), input)
    }

    /// Open a session over an already parsed definition.
    pub fn start_definition(
        &self,
        definition: Arc<AgentDefinition>,
        input: Value,
    ) -> Result<SessionId, SessionError> {
        let bindings = self.engine.seed(&definition, input)?;
        let mut session = Session::new(definition, bindings, self.engine.config().max_trace_events);
        session.trace.push(TraceEvent::Started {
            agent: session.definition.id.clone(),
            version: session.definition.version.clone(),
            at: Utc::now(),
        });

        let id = session.id;
        let agent = telemetry::safe_text(&session.definition.id);
        self.sessions.write().insert(id, Arc::new(Mutex::new(session)));
        info!(session = %id, agent = agent.as_str(), "session started");
        Ok(id)
    }

    /// Pause before `step_id` (or at [`END_BREAKPOINT`]).
    pub async fn set_breakpoint(&self, id: &SessionId, step_id: &str) -> Result<(), SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        if step_id != END_BREAKPOINT && session.definition.step(step_id).is_none() {
            return Err(SessionError::UnknownStep {
                agent: session.definition.id.clone(),
                step_id: step_id.to_string(),
            });
        }
        session.breakpoints.insert(step_id.to_string());
        debug!(session = %id, step_id = %telemetry::safe_text(step_id), "breakpoint set");
        Ok(())
    }

    /// Remove a breakpoint. Returns whether it was set.
    pub async fn clear_breakpoint(&self, id: &SessionId, step_id: &str) -> Result<bool, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        Ok(session.breakpoints.remove(step_id))
    }

    /// Run until the next breakpoint, the end, or a failure.
    ///
    /// When resuming from a breakpoint the paused step runs first; its
    /// breakpoint does not fire again. A step failure moves the session to
    /// `Failed` and is returned as the error.
    pub async fn continue_session(&self, id: &SessionId) -> Result<SessionState, SessionError> {
        let handle = self.handle(id)?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        session.touch();

        if !session.status.can_continue() {
            return Err(SessionError::InvalidState {
                action: "continue".to_string(),
                status: session.status.to_string(),
            });
        }

        let resume_at = (session.status == SessionStatus::PausedAtBreakpoint).then_some(session.cursor);
        let from_end = session.status == SessionStatus::PausedAtEnd;
        if session.status != SessionStatus::Ready {
            session.trace.push(TraceEvent::Resumed { at: Utc::now() });
        }
        transition(session, SessionStatus::Running);

        let definition = Arc::clone(&session.definition);
        let runner = self.engine.runner();
        let started = Instant::now();

        while let Some(step) = definition.steps.get(session.cursor) {
            if resume_at != Some(session.cursor) && session.breakpoints.contains(&step.id) {
                session.trace.push(TraceEvent::Paused {
                    step_id: Some(step.id.clone()),
                    at: Utc::now(),
                });
                transition(session, SessionStatus::PausedAtBreakpoint);
                return Ok(session.state());
            }

            match runner.run(step, &mut session.bindings, &mut session.trace).await {
                Ok(StepOutcome::Completed { value, .. }) => {
                    if step.save.is_some() {
                        session.last_saved = Some(value);
                    }
                }
                Ok(StepOutcome::Skipped) => {}
                Err(e) if self.engine.continues_past(&e) => {
                    let msg = session.bindings.mask_text(&e.to_string());
                    warn!(session = %id, error = %telemetry::safe_text(&msg), "step failed, continuing");
                }
                Err(e) => {
                    session.error = Some(session.bindings.mask_text(&e.to_string()));
                    session.trace.push(TraceEvent::Finished {
                        success: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                        at: Utc::now(),
                    });
                    transition(session, SessionStatus::Failed);
                    return Err(e.into());
                }
            }
            session.cursor += 1;
            session.touch();
        }

        if !from_end && session.breakpoints.contains(END_BREAKPOINT) {
            session.trace.push(TraceEvent::Paused {
                step_id: None,
                at: Utc::now(),
            });
            transition(session, SessionStatus::PausedAtEnd);
            return Ok(session.state());
        }

        let output = self
            .engine
            .render_outputs(&definition, &session.bindings, session.last_saved.clone());
        session.result = Some(output);
        session.trace.push(TraceEvent::Finished {
            success: true,
            duration_ms: started.elapsed().as_millis() as u64,
            at: Utc::now(),
        });
        transition(session, SessionStatus::Completed);
        Ok(session.state())
    }

    /// Current status, cursor and masked bindings.
    pub async fn get_state(&self, id: &SessionId) -> Result<SessionState, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        Ok(session.state())
    }

    /// Overwrite a binding. Later steps see the new value.
    pub async fn set_variable(
        &self,
        id: &SessionId,
        name: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        if session.status.is_terminal() {
            return Err(SessionError::InvalidState {
                action: "set a variable".to_string(),
                status: session.status.to_string(),
            });
        }
        if session.bindings.is_secret(name) {
            if let Some(text) = value.as_str() {
                session.bindings.set_secret(name, text.to_string());
            } else {
                session.bindings.set_secret(name, crate::template::render_value(&value));
            }
        } else {
            session.bindings.set(name, value);
        }
        session.trace.push(TraceEvent::VariableSet {
            name: name.to_string(),
            at: Utc::now(),
        });
        debug!(session = %id, name = %telemetry::safe_text(name), "variable set");
        Ok(())
    }

    /// Rendered trace lines, oldest first.
    pub async fn get_trace(&self, id: &SessionId) -> Result<Vec<String>, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        Ok(session.trace.lines())
    }

    /// Stop a session and release it. Returns its final state.
    pub async fn stop_session(&self, id: &SessionId) -> Result<SessionState, SessionError> {
        let handle = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut session = handle.lock().await;
        session.trace.push(TraceEvent::Stopped { at: Utc::now() });
        transition(&mut session, SessionStatus::Stopped);
        Ok(session.state())
    }

    /// Stop every session, e.g. on shutdown. Sessions still running a step
    /// finish that step first.
    pub async fn stop_all(&self) -> Vec<SessionState> {
        let handles: Vec<_> = self.sessions.write().drain().map(|(_, handle)| handle).collect();
        let stops = handles.into_iter().map(|handle| async move {
            let mut session = handle.lock().await;
            session.trace.push(TraceEvent::Stopped { at: Utc::now() });
            transition(&mut session, SessionStatus::Stopped);
            session.state()
        });
        let states = join_all(stops).await;
        if !states.is_empty() {
            info!(stopped = states.len(), "stopped all sessions");
        }
        states
    }

    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop sessions untouched for longer than `max_idle`. Sessions busy
    /// running a step are left alone. Returns how many were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, handle| match handle.try_lock() {
            Ok(session) => {
                let keep = session.last_activity.elapsed() <= max_idle;
                if !keep {
                    debug!(session = %id, status = %session.status, "reaping idle session");
                }
                keep
            }
            Err(_) => true,
        });
        before - sessions.len()
    }

    /// Periodically sweep sessions idle longer than the configured
    /// `session_idle_timeout_secs`. The task ends once the registry is
    /// dropped.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let idle = registry.engine.config().session_idle_timeout();
                let reaped = registry.sweep_idle(idle);
                if reaped > 0 {
                    info!(reaped, remaining = registry.len(), "reaped idle sessions");
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

fn transition(session: &mut Session, to: SessionStatus) {
    let from = session.status.to_string();
    telemetry::record_session_transition(&session.id.to_string(), &from, &to.to_string());
    session.status = to;
}
