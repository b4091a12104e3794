//! Unit tests for debug sessions
//!
//! Tests cover:
//! - Pausing before a breakpointed step and resuming
//! - Variable edits visible to later templates
//! - State and trace snapshots
//! - Invalid operations

use agentflow::capability::{CapabilityRegistry, CapabilityRequest, EchoCapability};
use agentflow::engine::{Engine, StaticSecrets};
use agentflow::errors::SessionError;
use agentflow::session::{SessionRegistry, SessionStatus, END_BREAKPOINT};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SUPPORT_AGENT: &str = r#"@agent support v1
trigger: http POST /support
vars:
  question:
    required: true
  tone: polite
steps:
  - id: classify
    kind: llm
    prompt: "Classify: {question}"
    save: category
  - id: generate_response
    kind: llm
    prompt: "Answer in a {tone} tone: {question}"
    save: answer
outputs:
  answer: "{answer}"
  category: "{category}"
@end
"#;

/// Registry whose llm capability records every prompt it receives and
/// replies with a fixed string.
fn recording_registry() -> (SessionRegistry, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let caps = Arc::new(CapabilityRegistry::new());
    let seen = prompts.clone();
    caps.register_fn("llm", None, move |req: CapabilityRequest| {
        let seen = seen.clone();
        async move {
            let prompt = req.field_str("prompt").unwrap_or_default().to_string();
            seen.lock().push(prompt.clone());
            Ok(json!(format!("reply to <{}>", prompt)))
        }
    });
    (SessionRegistry::new(Arc::new(Engine::new(caps))), prompts)
}

// ============================================================================
// Breakpoints
// ============================================================================

mod breakpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_pauses_before_breakpoint_and_sees_edits() {
        let (registry, prompts) = recording_registry();
        let id = registry
            .start(SUPPORT_AGENT, json!({"question": "where is my order?"}))
            .unwrap();
        registry.set_breakpoint(&id, "generate_response").await.unwrap();

        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::PausedAtBreakpoint);
        assert_eq!(state.next_step.as_deref(), Some("generate_response"));
        assert_eq!(state.cursor, 1);
        // classify ran, generate_response did not
        assert_eq!(prompts.lock().len(), 1);
        assert!(state.bindings.contains_key("category"));
        assert!(!state.bindings.contains_key("answer"));

        registry
            .set_variable(&id, "tone", json!("pirate"))
            .await
            .unwrap();

        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::Completed);
        let prompts = prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1], "Answer in a pirate tone: where is my order?");
        assert_eq!(
            state.result.unwrap()["answer"],
            json!("reply to <Answer in a pirate tone: where is my order?>")
        );
    }

    #[tokio::test]
    async fn test_breakpoint_on_first_step() {
        let (registry, prompts) = recording_registry();
        let id = registry.start(SUPPORT_AGENT, json!({"question": "q"})).unwrap();
        registry.set_breakpoint(&id, "classify").await.unwrap();

        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::PausedAtBreakpoint);
        assert_eq!(state.cursor, 0);
        assert!(prompts.lock().is_empty());

        // clearing the only breakpoint lets the rest run through
        assert!(registry.clear_breakpoint(&id, "classify").await.unwrap());
        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_end_breakpoint() {
        let (registry, _) = recording_registry();
        let id = registry.start(SUPPORT_AGENT, json!({"question": "q"})).unwrap();
        registry.set_breakpoint(&id, END_BREAKPOINT).await.unwrap();

        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::PausedAtEnd);
        assert_eq!(state.next_step, None);
        assert!(state.result.is_none());

        registry.set_variable(&id, "answer", json!("overridden")).await.unwrap();
        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.result.unwrap()["answer"], "overridden");
    }
}

// ============================================================================
// Snapshots
// ============================================================================

mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn test_trace_lines_follow_execution() {
        let (registry, _) = recording_registry();
        let id = registry.start(SUPPORT_AGENT, json!({"question": "q"})).unwrap();
        registry.set_breakpoint(&id, "generate_response").await.unwrap();
        registry.continue_session(&id).await.unwrap();
        registry.set_variable(&id, "tone", json!("terse")).await.unwrap();
        registry.continue_session(&id).await.unwrap();

        let lines = registry.get_trace(&id).await.unwrap();
        let expected = [
            "started agent 'support'",
            "step 'classify' completed",
            "paused before step 'generate_response'",
            "variable 'tone' set",
            "resumed",
            "step 'generate_response' completed",
            "finished successfully",
        ];
        assert_eq!(lines.len(), expected.len(), "{:#?}", lines);
        for (line, fragment) in lines.iter().zip(expected) {
            assert!(line.contains(fragment), "{line:?} should contain {fragment:?}");
        }
    }

    #[tokio::test]
    async fn test_state_masks_secrets() {
        let caps = Arc::new(CapabilityRegistry::new());
        caps.register("http", None, EchoCapability);
        let engine = Engine::new(caps)
            .with_secret_resolver(StaticSecrets::new().with("TOKEN", "tok-abcdef"));
        let registry = SessionRegistry::new(Arc::new(engine));
        let src = "@agent s v1\ntrigger: manual\nsecrets:\n  - TOKEN\nsteps:\n  - id: call\n    kind: http\n    header: \"{TOKEN}\"\n    save: resp\noutputs:\n  r: \"{resp}\"\n";

        let id = registry.start(src, Value::Null).unwrap();
        let state = registry.continue_session(&id).await.unwrap();
        assert_eq!(state.bindings["TOKEN"], "[REDACTED]");
        assert_eq!(state.bindings["resp"], json!({"header": "[REDACTED]"}));
        let serialized = serde_json::to_string(&state).unwrap();
        assert!(!serialized.contains("tok-abcdef"));
        assert_eq!(state.result.unwrap()["r"], json!({"header": "[REDACTED]"}));
    }
}

// ============================================================================
// Errors
// ============================================================================

mod session_error_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_source_carries_diagnostics() {
        let (registry, _) = recording_registry();
        let err = registry.start("@agent broken v1\n", Value::Null).unwrap_err();
        match err {
            SessionError::InvalidSource(validation) => {
                assert!(!validation.valid);
                assert!(!validation.errors.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_variable_at_start() {
        let (registry, _) = recording_registry();
        let err = registry.start(SUPPORT_AGENT, json!({})).unwrap_err();
        assert!(matches!(err, SessionError::Execution(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_step_failure_marks_session_failed() {
        let caps = Arc::new(CapabilityRegistry::new());
        caps.register_fn("llm", None, |_req: CapabilityRequest| async move {
            Err::<Value, _>(anyhow::anyhow!("model overloaded"))
        });
        let registry = SessionRegistry::new(Arc::new(Engine::new(caps)));
        let id = registry.start(SUPPORT_AGENT, json!({"question": "q"})).unwrap();

        let err = registry.continue_session(&id).await.unwrap_err();
        assert!(err.to_string().contains("classify"));

        let state = registry.get_state(&id).await.unwrap();
        assert_eq!(state.status, SessionStatus::Failed);
        assert!(state.error.unwrap().contains("model overloaded"));

        let err = registry
            .set_variable(&id, "tone", json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (registry, _) = recording_registry();
        let id = registry.start(SUPPORT_AGENT, json!({"question": "q"})).unwrap();
        registry.stop_session(&id).await.unwrap();
        assert!(matches!(
            registry.continue_session(&id).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.stop_session(&id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reaper_removes_idle_sessions() {
        let caps = Arc::new(CapabilityRegistry::new());
        let config = agentflow::EngineConfig {
            session_idle_timeout_secs: 0,
            ..Default::default()
        };
        let engine = Engine::new(caps).with_config(config);
        let registry = Arc::new(SessionRegistry::new(Arc::new(engine)));
        registry
            .start("@agent idle v1\ntrigger: manual\n", Value::Null)
            .unwrap();
        assert_eq!(registry.len(), 1);

        let reaper = registry.spawn_reaper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());
        reaper.abort();
    }
}
