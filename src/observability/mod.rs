//! Observability module
//!
//! Structured logging for executions, steps and debug sessions.

pub mod telemetry;
