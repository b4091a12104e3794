//! Engine configuration.
//!
//! Loaded from TOML (`agentflow.toml` in the working directory, then
//! `~/.config/agentflow/config.toml`), with `AGENTFLOW_*` environment
//! variables applied on top. Every field has a default, so an empty file
//! is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::retry::Backoff;
use crate::template::MissingVariablePolicy;

/// What the engine does when a step exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the execution and return the error.
    #[default]
    Abort,
    /// Record the failure in the trace and move on to the next step.
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => bail!("unknown failure policy '{}' (expected abort or continue)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt timeout for steps that do not set `timeout_ms`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub retry_backoff: BackoffKind,
    /// Fixed delay, or the first delay of an exponential backoff.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub missing_variables: MissingVariablePolicy,
    /// Oldest trace events are dropped beyond this.
    #[serde(default = "default_max_trace_events")]
    pub max_trace_events: usize,
    /// Debug sessions untouched for this long are reaped.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

fn default_timeout_ms() -> u64 {
    60_000
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_max_retry_delay_ms() -> u64 {
    30_000
}
fn default_max_trace_events() -> usize {
    1000
}
fn default_session_idle_timeout_secs() -> u64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            retry_backoff: BackoffKind::default(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            failure_policy: FailurePolicy::default(),
            missing_variables: MissingVariablePolicy::default(),
            max_trace_events: default_max_trace_events(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or from the default locations when `None`. Falls
    /// back to defaults when no file exists. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None => {
                let mut candidates = vec![PathBuf::from("agentflow.toml")];
                if let Some(home) = dirs::home_dir() {
                    candidates.push(home.join(".config/agentflow/config.toml"));
                }

                let mut loaded = None;
                for candidate in &candidates {
                    if candidate.is_file() {
                        loaded = Some(Self::from_file(candidate)?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Apply `AGENTFLOW_*` overrides. `lookup` abstracts the environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENTFLOW_DEFAULT_TIMEOUT_MS") {
            self.default_timeout_ms = v
                .trim()
                .parse()
                .with_context(|| format!("AGENTFLOW_DEFAULT_TIMEOUT_MS is not a number: {}", v))?;
        }
        if let Some(v) = lookup("AGENTFLOW_RETRY_DELAY_MS") {
            self.retry_delay_ms = v
                .trim()
                .parse()
                .with_context(|| format!("AGENTFLOW_RETRY_DELAY_MS is not a number: {}", v))?;
        }
        if let Some(v) = lookup("AGENTFLOW_FAILURE_POLICY") {
            self.failure_policy = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be greater than zero");
        }
        if self.max_trace_events == 0 {
            bail!("max_trace_events must be greater than zero");
        }
        if self.retry_backoff == BackoffKind::Exponential && self.max_retry_delay_ms < self.retry_delay_ms {
            bail!("max_retry_delay_ms must not be smaller than retry_delay_ms");
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Backoff between retries as configured.
    pub fn backoff(&self) -> Backoff {
        match self.retry_backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(Duration::from_millis(self.retry_delay_ms)),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: Duration::from_millis(self.retry_delay_ms),
                max: Duration::from_millis(self.max_retry_delay_ms),
            },
        }
    }
}
