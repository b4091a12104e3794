//! Running one step: guard, resolve, dispatch with retry, save.
//!
//! Shared by [`Engine`](super::Engine) and debug sessions so both walk a
//! definition the same way.

use chrono::Utc;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};

use crate::capability::{CapabilityRegistry, CapabilityRequest};
use crate::condition;
use crate::config::EngineConfig;
use crate::dsl::Step;
use crate::errors::ExecutionError;
use crate::observability::telemetry;
use crate::redact;
use crate::retry::{self, AttemptError, RetryPolicy};
use crate::template::TemplateResolver;

use super::bindings::BindingTable;
use super::trace::{Trace, TraceEvent};

/// How a single step ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The `when` guard was false; nothing was dispatched.
    Skipped,
    Completed { value: Value, attempts: u32 },
}

pub struct StepRunner<'a> {
    registry: &'a CapabilityRegistry,
    config: &'a EngineConfig,
    resolver: TemplateResolver,
}

impl<'a> StepRunner<'a> {
    pub fn new(registry: &'a CapabilityRegistry, config: &'a EngineConfig) -> Self {
        Self {
            registry,
            config,
            resolver: TemplateResolver::new(config.missing_variables),
        }
    }

    fn policy_for(&self, step: &Step) -> RetryPolicy {
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout());
        RetryPolicy::new(step.retries, timeout).with_backoff(self.config.backoff())
    }

    /// Run `step` against `bindings`, recording what happened in `trace`.
    ///
    /// On success the value is bound under `save` (if any). Failures are
    /// recorded in the trace before being returned.
    pub async fn run(
        &self,
        step: &Step,
        bindings: &mut BindingTable,
        trace: &mut Trace,
    ) -> Result<StepOutcome, ExecutionError> {
        let span = telemetry::step_span(&step.id, &step.kind, step.provider.as_deref());
        let started = Instant::now();

        let condition = match step.when {
            Some(ref expr) => {
                let passed = condition::evaluate(expr, bindings.as_map());
                debug!(parent: &span, condition = %telemetry::safe_text(expr), passed, "guard evaluated");
                if !passed {
                    trace.push(TraceEvent::StepSkipped {
                        step_id: step.id.clone(),
                        condition: expr.clone(),
                        at: Utc::now(),
                    });
                    telemetry::record_step_outcome(&span, "skipped", 0, 0);
                    return Ok(StepOutcome::Skipped);
                }
                Some(true)
            }
            None => None,
        };

        let capability = match self.registry.resolve(step) {
            Ok(capability) => capability,
            Err(e) => {
                self.record_failure(step, trace, 0, started, &e.to_string(), bindings);
                telemetry::record_step_outcome(&span, "no_capability", 0, 0);
                return Err(e);
            }
        };

        let config = match self
            .resolver
            .resolve(&Value::Object(step.config.clone()), bindings.as_map())
        {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let request = CapabilityRequest {
            step_id: step.id.clone(),
            kind: step.kind.clone(),
            provider: step.provider.clone(),
            config,
            bindings: bindings.as_map().clone(),
        };

        let policy = self.policy_for(step);
        let secrets = bindings.secret_values();
        let (capability, request, step_id, secrets) =
            (&capability, &request, step.id.as_str(), secrets.as_slice());
        // errors are masked before the dispatch and retry layers log them
        let outcome = retry::with_policy(&policy, move |attempt| {
            telemetry::track_dispatch(step_id, attempt, move || async move {
                capability
                    .invoke(request)
                    .await
                    .map_err(|e| {
                        let text = format!("{:#}", e);
                        anyhow::anyhow!("{}", redact::mask_known(&text, secrets))
                    })
            })
        })
        .instrument(span.clone())
        .await;

        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        match outcome.result {
            Ok(value) => {
                if let Some(ref name) = step.save {
                    bindings.set(name.clone(), value.clone());
                }
                trace.push(TraceEvent::StepCompleted {
                    step_id: step.id.clone(),
                    condition,
                    attempts: outcome.attempts,
                    duration_ms,
                    saved_as: step.save.clone(),
                    at: Utc::now(),
                });
                telemetry::record_step_outcome(&span, "completed", outcome.attempts, duration_ms);
                let step_id = telemetry::safe_text(&step.id);
                info!(
                    step_id = step_id.as_str(),
                    attempts = outcome.attempts,
                    duration_ms,
                    "step completed"
                );
                Ok(StepOutcome::Completed {
                    value,
                    attempts: outcome.attempts,
                })
            }
            Err(err) => {
                let error = match err {
                    AttemptError::TimedOut(timeout) => ExecutionError::StepTimedOut {
                        step_id: step.id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                        attempts: outcome.attempts,
                    },
                    AttemptError::Failed(cause) => ExecutionError::StepFailed {
                        step_id: step.id.clone(),
                        attempts: outcome.attempts,
                        cause: bindings.mask_text(&format!("{:#}", cause)),
                    },
                };
                let outcome_label = if matches!(error, ExecutionError::StepTimedOut { .. }) {
                    "timed_out"
                } else {
                    "failed"
                };
                self.record_failure(
                    step,
                    trace,
                    error.attempts(),
                    started,
                    &error.to_string(),
                    bindings,
                );
                telemetry::record_step_outcome(&span, outcome_label, error.attempts(), duration_ms);
                Err(error)
            }
        }
    }

    fn record_failure(
        &self,
        step: &Step,
        trace: &mut Trace,
        attempts: u32,
        started: Instant,
        error: &str,
        bindings: &BindingTable,
    ) {
        trace.push(TraceEvent::StepFailed {
            step_id: step.id.clone(),
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error: bindings.mask_text(error),
            at: Utc::now(),
        });
    }
}
