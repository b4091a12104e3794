//! Unit tests for the execution engine
//!
//! Tests cover:
//! - The hello-world scenario end to end
//! - Retry budgets and per-attempt timeouts
//! - Configuration errors (no capability, missing variable)
//! - Failure policy, guards, traces and secret masking

use agentflow::capability::{CapabilityRegistry, CapabilityRequest, EchoCapability};
use agentflow::config::{EngineConfig, FailurePolicy};
use agentflow::engine::{Engine, StaticSecrets};
use agentflow::errors::ExecutionError;
use agentflow::{dsl, AgentDefinition};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn definition(src: &str) -> AgentDefinition {
    dsl::parse(src).into_valid().expect("valid source")
}

const HELLO: &str = r#"@agent hello v1
trigger: http POST /hello
vars:
  name:
    type: string
    required: true
steps:
  - id: greet
    kind: llm
    provider: openai
    prompt: "Hi {name}"
    save: greeting
outputs:
  response: "{greeting}"
@end
"#;

// ============================================================================
// End-to-end
// ============================================================================

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_dispatches_once_with_resolved_prompt() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(CapabilityRegistry::new());
        let seen = prompts.clone();
        registry.register_fn("llm", Some("openai"), move |req: CapabilityRequest| {
            let seen = seen.clone();
            async move {
                let prompt = req.field_str("prompt").unwrap_or_default().to_string();
                seen.lock().push(prompt);
                Ok(json!("Hello Ann!"))
            }
        });

        let out = Engine::new(registry)
            .execute(&definition(HELLO), json!({"name": "Ann"}))
            .await
            .unwrap();

        assert_eq!(out, json!({"response": "Hello Ann!"}));
        assert_eq!(*prompts.lock(), vec!["Hi Ann".to_string()]);
    }

    #[test]
    fn test_hello_from_sync_code() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", None, EchoCapability);
        let engine = Engine::new(registry);
        let def = definition(HELLO);

        let out = tokio_test::block_on(engine.execute(&def, json!({"name": "Ann"}))).unwrap();
        assert_eq!(out, json!({"response": {"prompt": "Hi Ann"}}));

        let out = engine.execute_blocking(&def, json!({"name": "Bo"})).unwrap();
        assert_eq!(out["response"]["prompt"], "Hi Bo");
    }

    #[tokio::test]
    async fn test_no_outputs_returns_last_saved_value() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register_fn("fn", None, |req: CapabilityRequest| async move {
            Ok(json!(req.step_id))
        });
        let src = "@agent last v1\ntrigger: manual\nsteps:\n  - id: one\n    kind: fn\n    save: a\n  - id: two\n    kind: fn\n    save: b\n  - id: three\n    kind: fn\n";
        let out = Engine::new(registry)
            .execute(&definition(src), Value::Null)
            .await
            .unwrap();
        assert_eq!(out, json!("two"));
    }
}

// ============================================================================
// Retry & Timeout
// ============================================================================

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_retries_third_attempt_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = Arc::new(CapabilityRegistry::new());
        let counter = calls.clone();
        registry.register_fn("http", None, move |_req: CapabilityRequest| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    anyhow::bail!("flaky upstream (attempt {})", n);
                }
                Ok(json!({"status": 200}))
            }
        });

        let src = "@agent r v1\ntrigger: manual\nsteps:\n  - id: fetch\n    kind: http\n    retries: 2\n    save: page\noutputs:\n  status: \"{page.status}\"\n";
        let report = Engine::new(registry)
            .execute_traced(&definition(src), Value::Null)
            .await;

        assert_eq!(report.result.unwrap(), json!({"status": 200}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(report
            .trace
            .lines()
            .iter()
            .any(|l| l.contains("step 'fetch' completed") && l.contains("3 attempts")));
    }

    #[tokio::test]
    async fn test_exhausted_retries_name_step_and_attempts() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register_fn("http", None, |_req: CapabilityRequest| async move {
            Err::<Value, _>(anyhow::anyhow!("connection refused"))
        });
        let src = "@agent r v1\ntrigger: manual\nsteps:\n  - id: fetch\n    kind: http\n    retries: 1\n";
        let err = Engine::new(registry)
            .execute(&definition(src), Value::Null)
            .await
            .unwrap_err();

        match err {
            ExecutionError::StepFailed {
                step_id,
                attempts,
                cause,
            } => {
                assert_eq!(step_id, "fetch");
                assert_eq!(attempts, 2);
                assert!(cause.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_without_retries_aborts_with_step_id() {
        let reached_second = Arc::new(AtomicU32::new(0));
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register_fn("slow", None, |_req: CapabilityRequest| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let flag = reached_second.clone();
        registry.register_fn("fast", None, move |_req: CapabilityRequest| {
            flag.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Null) }
        });

        let src = "@agent t v1\ntrigger: manual\nsteps:\n  - id: think\n    kind: slow\n    timeout_ms: 50\n  - id: after\n    kind: fast\n";
        let err = Engine::new(registry)
            .execute(&definition(src), Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::StepTimedOut { ref step_id, timeout_ms: 50, attempts: 1 } if step_id == "think"
        ));
        assert_eq!(err.step_id(), Some("think"));
        assert_eq!(reached_second.load(Ordering::SeqCst), 0);
    }
}

// ============================================================================
// Configuration errors
// ============================================================================

mod configuration_error_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_capability_is_not_retried() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", Some("openai"), EchoCapability);
        let src = "@agent c v1\ntrigger: manual\nsteps:\n  - id: look\n    kind: vision\n    provider: local\n    retries: 5\n";
        let err = Engine::new(registry)
            .execute(&definition(src), Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.attempts(), 0);
        assert!(err.to_string().contains("kind=vision provider=local"));
    }

    #[tokio::test]
    async fn test_provider_falls_back_to_kind_default() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", None, EchoCapability);
        let out = Engine::new(registry)
            .execute(&definition(HELLO), json!({"name": "Ann"}))
            .await
            .unwrap();
        assert_eq!(out["response"]["prompt"], "Hi Ann");
    }

    #[tokio::test]
    async fn test_missing_required_variable() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", None, EchoCapability);
        let err = Engine::new(registry)
            .execute(&definition(HELLO), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::MissingVariable { ref name } if name == "name"));
    }
}

// ============================================================================
// Guards, failure policy, secrets
// ============================================================================

mod behaviour_tests {
    use super::*;

    #[tokio::test]
    async fn test_false_guard_skips_step() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", None, EchoCapability);
        let src = "@agent g v1\ntrigger: manual\nvars:\n  mode: chat\nsteps:\n  - id: search\n    kind: vector\n    when: \"{mode} == 'web'\"\n  - id: answer\n    kind: llm\n    text: \"{mode}\"\n    save: reply\noutputs:\n  reply: \"{reply.text}\"\n";
        let report = Engine::new(registry)
            .execute_traced(&definition(src), Value::Null)
            .await;
        // the vector step has no capability; skipping it must not fail the run
        assert_eq!(report.result.unwrap(), json!({"reply": "chat"}));
        assert!(report.trace.lines().iter().any(|l| l.contains("step 'search' skipped")));
    }

    #[tokio::test]
    async fn test_continue_policy_moves_past_failures() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register_fn("bad", None, |_req: CapabilityRequest| async move {
            Err::<Value, _>(anyhow::anyhow!("nope"))
        });
        registry.register("llm", None, EchoCapability);
        let config = EngineConfig {
            failure_policy: FailurePolicy::Continue,
            ..EngineConfig::default()
        };
        let src = "@agent p v1\ntrigger: manual\nsteps:\n  - id: optional\n    kind: bad\n    save: extra\n  - id: main\n    kind: llm\n    text: \"[{extra}]\"\n    save: out\noutputs:\n  text: \"{out.text}\"\n";
        let report = Engine::new(registry)
            .with_config(config)
            .execute_traced(&definition(src), Value::Null)
            .await;
        assert_eq!(report.result.unwrap(), json!({"text": "[]"}));
        assert!(report.trace.lines().iter().any(|l| l.contains("step 'optional' failed")));
    }

    #[tokio::test]
    async fn test_secrets_reach_capability_but_not_report() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("http", None, EchoCapability);
        let src = "@agent s v1\ntrigger: manual\nsecrets:\n  - API_KEY: env:SERVICE_KEY\nsteps:\n  - id: call\n    kind: http\n    auth: \"Bearer {API_KEY}\"\n    save: resp\noutputs:\n  sent: \"{resp.auth}\"\n";
        let report = Engine::new(registry)
            .with_secret_resolver(StaticSecrets::new().with("API_KEY", "k-123456789"))
            .execute_traced(&definition(src), Value::Null)
            .await;

        assert_eq!(report.result.unwrap(), json!({"sent": "Bearer k-123456789"}));
        assert_eq!(report.bindings["API_KEY"], json!("[REDACTED]"));
        assert_eq!(report.bindings["resp"], json!({"auth": "Bearer [REDACTED]"}));
    }

    #[tokio::test]
    async fn test_input_keys_without_declaration_are_bound() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("llm", None, EchoCapability);
        let src = "@agent i v1\ntrigger: manual\nsteps:\n  - id: a\n    kind: llm\n    text: \"{topic}\"\n    save: r\noutputs:\n  t: \"{r.text}\"\n";
        let out = Engine::new(registry)
            .execute(&definition(src), json!({"topic": "owls"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"t": "owls"}));
    }
}
