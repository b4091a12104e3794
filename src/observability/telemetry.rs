//! Telemetry & Observability
//!
//! Structured logging and tracing for agent executions:
//! - execution and step spans carrying agent/step identity
//! - timed capability dispatch with success/failure recording
//! - session state transition logging
//! - configurable log levels via RUST_LOG

use std::time::Instant;
use tracing::{debug, info, info_span, warn, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::redact::redact_secrets;

/// Sanitize a string for safe log output by escaping control characters.
/// Prevents log injection where input embeds newlines to forge log entries.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Sanitize and redact in one go; use for any user-controlled text.
pub fn safe_text(s: &str) -> String {
    redact_secrets(&sanitize_for_log(s)).into_owned()
}

/// Initialize global tracing subscriber.
/// Only enables output if RUST_LOG is explicitly set, so library users get
/// a quiet default.
pub fn init_tracing() {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        init_tracing_with_filter(&filter);
    }
}

/// Initialize with a custom filter string; compact human-readable output on
/// stderr.
pub fn init_tracing_with_filter(filter: &str) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_level(true)
            .compact()
            .with_writer(std::io::stderr);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// Initialize JSON-lines output, for shipping logs to a collector.
pub fn init_tracing_json(filter: &str) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// Span covering one whole agent execution.
pub fn execution_span(agent: &str, version: &str) -> Span {
    let safe_agent = safe_text(agent);
    let safe_version = safe_text(version);
    info_span!(
        "agent_execution",
        agent = safe_agent.as_str(),
        version = safe_version.as_str(),
        steps_run = tracing::field::Empty,
        success = tracing::field::Empty,
    )
}

/// Span covering one step, across all of its attempts.
pub fn step_span(step_id: &str, kind: &str, provider: Option<&str>) -> Span {
    let safe_step = safe_text(step_id);
    let safe_kind = safe_text(kind);
    let safe_provider = provider.map(safe_text).unwrap_or_default();
    info_span!(
        "step",
        step_id = safe_step.as_str(),
        kind = safe_kind.as_str(),
        provider = safe_provider.as_str(),
        attempts = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
}

/// Time one capability dispatch and log its outcome.
pub async fn track_dispatch<F, Fut, T, E>(step_id: &str, attempt: u32, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let step = safe_text(step_id);
    debug!(step_id = step.as_str(), attempt, "dispatching");

    match f().await {
        Ok(result) => {
            let duration = start.elapsed().as_millis() as u64;
            debug!(step_id = step.as_str(), attempt, duration_ms = duration, "dispatch completed");
            Ok(result)
        }
        Err(e) => {
            let duration = start.elapsed().as_millis() as u64;
            let safe_err = safe_text(&e.to_string());
            warn!(
                step_id = step.as_str(),
                attempt,
                duration_ms = duration,
                error = safe_err.as_str(),
                "dispatch failed"
            );
            Err(e)
        }
    }
}

/// Record how a step ended on its span.
pub fn record_step_outcome(span: &Span, outcome: &str, attempts: u32, duration_ms: u64) {
    span.record("outcome", outcome);
    span.record("attempts", attempts);
    span.record("duration_ms", duration_ms);
}

/// Record a debug session state transition.
pub fn record_session_transition(session_id: &str, from: &str, to: &str) {
    let safe_from = sanitize_for_log(from);
    let safe_to = sanitize_for_log(to);
    info!(
        session = session_id,
        from = safe_from.as_str(),
        to = safe_to.as_str(),
        "Session state transition"
    );
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
