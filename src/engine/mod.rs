//! Execution engine.
//!
//! Walks a parsed [`AgentDefinition`] against live input:
//!
//! 1. seed the binding table (secrets, undeclared input keys, declared
//!    variables in order)
//! 2. run each step in order (guard, resolve, dispatch with retry, save)
//! 3. render the outputs
//!
//! Steps run strictly one after another. A failing step aborts the run
//! unless the configured failure policy is `continue`.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::capability::CapabilityRegistry;
use crate::config::{EngineConfig, FailurePolicy};
use crate::dsl::{AgentDefinition, VarSource};
use crate::errors::{AgentflowError, ExecutionError};
use crate::observability::telemetry;
use crate::template::TemplateResolver;

pub mod bindings;
pub mod secrets;
pub mod step;
pub mod trace;

pub use bindings::BindingTable;
pub use secrets::{ChainedSecrets, EnvSecretResolver, SecretResolver, StaticSecrets};
pub use step::{StepOutcome, StepRunner};
pub use trace::{Trace, TraceEvent};

/// Everything one traced execution produced.
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    #[serde(serialize_with = "serialize_result")]
    pub result: Result<Value, ExecutionError>,
    pub trace: Trace,
    /// Final bindings with secrets masked.
    pub bindings: Map<String, Value>,
}

fn serialize_result<S>(result: &Result<Value, ExecutionError>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    #[serde(rename_all = "lowercase")]
    enum Repr<'a> {
        Ok(&'a Value),
        Error(String),
    }
    match result {
        Ok(v) => Repr::Ok(v).serialize(s),
        Err(e) => Repr::Error(e.to_string()).serialize(s),
    }
}

pub struct Engine {
    registry: Arc<CapabilityRegistry>,
    config: EngineConfig,
    secrets: Arc<dyn SecretResolver>,
}

impl Engine {
    /// Engine with default configuration, reading secrets from the
    /// environment.
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            secrets: Arc::new(EnvSecretResolver),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_secret_resolver<R: SecretResolver + 'static>(mut self, resolver: R) -> Self {
        self.secrets = Arc::new(resolver);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> StepRunner<'_> {
        StepRunner::new(&self.registry, &self.config)
    }

    /// Execute `definition` with `input` and return the rendered outputs.
    pub async fn execute(
        &self,
        definition: &AgentDefinition,
        input: Value,
    ) -> Result<Value, ExecutionError> {
        self.execute_traced(definition, input).await.result
    }

    /// Execute and keep the trace and final bindings.
    pub async fn execute_traced(&self, definition: &AgentDefinition, input: Value) -> ExecutionReport {
        let span = telemetry::execution_span(&definition.id, &definition.version);
        let mut trace = Trace::new(self.config.max_trace_events);
        let mut bindings = BindingTable::new();
        let result = self
            .run(definition, input, &mut bindings, &mut trace)
            .instrument(span.clone())
            .await;
        span.record("success", result.is_ok());
        ExecutionReport {
            result,
            trace,
            bindings: bindings.masked(),
        }
    }

    /// Run an execution to completion on a private current-thread runtime.
    /// For synchronous callers; must not be called from inside a runtime.
    pub fn execute_blocking(
        &self,
        definition: &AgentDefinition,
        input: Value,
    ) -> crate::errors::Result<Value> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| AgentflowError::Other(anyhow::Error::new(e).context("building runtime")))?;
        Ok(runtime.block_on(self.execute(definition, input))?)
    }

    async fn run(
        &self,
        definition: &AgentDefinition,
        input: Value,
        bindings: &mut BindingTable,
        trace: &mut Trace,
    ) -> Result<Value, ExecutionError> {
        let started = Instant::now();
        trace.push(TraceEvent::Started {
            agent: definition.id.clone(),
            version: definition.version.clone(),
            at: Utc::now(),
        });

        *bindings = self.seed(definition, input)?;

        let runner = self.runner();
        let mut last_saved = None;
        let mut steps_run = 0u32;
        let mut failed = false;

        for step in &definition.steps {
            match runner.run(step, bindings, trace).await {
                Ok(StepOutcome::Completed { value, .. }) => {
                    steps_run += 1;
                    if step.save.is_some() {
                        last_saved = Some(value);
                    }
                }
                Ok(StepOutcome::Skipped) => {}
                Err(e) if self.continues_past(&e) => {
                    steps_run += 1;
                    failed = true;
                    let msg = bindings.mask_text(&e.to_string());
                    warn!(error = %telemetry::safe_text(&msg), "step failed, continuing");
                }
                Err(e) => {
                    tracing::Span::current().record("steps_run", steps_run);
                    self.finish(trace, false, started);
                    return Err(e);
                }
            }
        }

        tracing::Span::current().record("steps_run", steps_run);
        let output = self.render_outputs(definition, bindings, last_saved);
        self.finish(trace, !failed, started);
        Ok(output)
    }

    fn finish(&self, trace: &mut Trace, success: bool, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        trace.push(TraceEvent::Finished {
            success,
            duration_ms,
            at: Utc::now(),
        });
        info!(success, duration_ms, "execution finished");
    }

    /// Whether the failure policy lets the run go on after `error`.
    /// Configuration errors always abort.
    pub(crate) fn continues_past(&self, error: &ExecutionError) -> bool {
        self.config.failure_policy == FailurePolicy::Continue && !error.is_configuration()
    }

    /// Build the initial binding table.
    ///
    /// Order: secrets, then input keys with no matching declaration, then
    /// declared variables in declaration order. Input never shadows a
    /// secret.
    pub fn seed(&self, definition: &AgentDefinition, input: Value) -> Result<BindingTable, ExecutionError> {
        let mut bindings = BindingTable::new();

        for decl in &definition.secrets {
            match self.secrets.resolve(decl) {
                Some(value) => bindings.set_secret(decl.name.clone(), value),
                None => {
                    return Err(ExecutionError::MissingSecret {
                        name: decl.name.clone(),
                        source_ref: decl.source.clone(),
                    })
                }
            }
        }

        let input = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(kind = json_kind(&other), "execution input is not an object; ignoring it");
                Map::new()
            }
        };

        for (key, value) in &input {
            if bindings.is_secret(key) {
                warn!(name = %telemetry::safe_text(key), "input may not override a secret; ignored");
                continue;
            }
            if definition.variable(key).is_none() {
                bindings.set(key.clone(), value.clone());
            }
        }

        for var in &definition.vars {
            if bindings.is_secret(&var.name) {
                continue;
            }
            let value = match var.source {
                VarSource::Literal => var.default.clone(),
                VarSource::Env => input
                    .get(&var.name)
                    .cloned()
                    .or_else(|| std::env::var(&var.name).ok().map(Value::String))
                    .or_else(|| var.default.clone()),
                VarSource::Input | VarSource::Computed => {
                    input.get(&var.name).cloned().or_else(|| var.default.clone())
                }
            };
            match value {
                Some(value) => bindings.set(var.name.clone(), value),
                None if var.required => {
                    return Err(ExecutionError::MissingVariable {
                        name: var.name.clone(),
                    })
                }
                None => debug!(name = %var.name, "optional variable left unbound"),
            }
        }

        Ok(bindings)
    }

    /// Render the declared outputs. With no outputs declared, the result is
    /// the last saved step value, or `null`.
    pub fn render_outputs(
        &self,
        definition: &AgentDefinition,
        bindings: &BindingTable,
        last_saved: Option<Value>,
    ) -> Value {
        if definition.outputs.is_empty() {
            return last_saved.unwrap_or(Value::Null);
        }
        let resolver = TemplateResolver::new(self.config.missing_variables);
        let outputs = definition
            .outputs
            .iter()
            .map(|out| (out.name.clone(), resolver.resolve_str(&out.template, bindings.as_map())))
            .collect();
        Value::Object(outputs)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
