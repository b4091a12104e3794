//! Unit tests for the DSL front-end
//!
//! Tests cover:
//! - Valid sources in both step notations
//! - Structural errors with line/column
//! - Validation warnings
//! - Duplicate step ids

use agentflow::dsl::{self, Severity, StepNotation};

const HELLO: &str = r#"@agent hello v1
description: Greets people
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
// Valid sources
// ============================================================================

mod valid_source_tests {
    use super::*;

    #[test]
    fn test_hello_is_valid() {
        let out = dsl::parse(HELLO);
        assert!(out.validation.valid, "{:?}", out.validation.errors);
        let def = out.ast.expect("ast");
        assert_eq!(def.id, "hello");
        assert_eq!(def.version, "v1");
        assert_eq!(def.description.as_deref(), Some("Greets people"));
        assert_eq!(def.trigger.spec.as_deref(), Some("http POST /hello"));
        assert_eq!(def.steps.len(), 1);
        assert_eq!(def.outputs[0].template, "{greeting}");
    }

    #[test]
    fn test_step_count_matches_declared_steps() {
        let src = "@agent many v2\ntrigger: manual\nsteps:\n  - id: a\n    kind: llm\n  - id: b\n    kind: http\n    url: https://example.com\n  - id: c\n    kind: vector\n@end\n";
        let out = dsl::parse(src);
        assert!(out.validation.valid);
        let ids: Vec<_> = out.ast.unwrap().steps.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_flat_notation() {
        let src = "@agent flat v1\ntrigger: manual\nstep fetch: http\n  url: https://example.com/{id}\n  retries: 2\n  save: page\nstep summarize: llm anthropic\n  prompt: \"Summarize {page}\"\n@end\n";
        let out = dsl::parse(src);
        assert!(out.validation.valid, "{:?}", out.validation.errors);
        let def = out.ast.unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].notation, StepNotation::Flat);
        assert_eq!(def.steps[0].retries, 2);
        assert_eq!(def.steps[1].provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let src = "# leading comment\n@agent c v1\n\ntrigger: manual # inline\nsteps:\n  # between\n  - id: a\n    kind: llm\n    prompt: \"keep # this\"\n";
        let out = dsl::parse(src);
        assert!(out.validation.valid, "{:?}", out.validation.errors);
        let def = out.ast.unwrap();
        assert_eq!(def.steps[0].config["prompt"], "keep # this");
    }

    #[test]
    fn test_unknown_kind_is_accepted() {
        let src = "@agent k v1\ntrigger: manual\nsteps:\n  - id: a\n    kind: teleport\n";
        let out = dsl::parse(src);
        assert!(out.validation.valid);
        assert!(out.validation.warnings.is_empty());
    }
}

// ============================================================================
// Errors
// ============================================================================

mod error_tests {
    use super::*;

    #[test]
    fn test_duplicate_step_ids_name_both_lines() {
        let src = "@agent d v1\ntrigger: manual\nsteps:\n  - id: greet\n    kind: llm\n  - id: greet\n    kind: llm\n";
        let out = dsl::parse(src);
        assert!(!out.validation.valid);
        let dup = out
            .validation
            .errors
            .iter()
            .find(|d| d.message.contains("Duplicate step id"))
            .expect("duplicate diagnostic");
        assert!(dup.message.contains("line 4"));
        assert!(dup.message.contains("line 6"));
        assert_eq!(dup.line, 6);
    }

    #[test]
    fn test_missing_trigger_is_error_with_position() {
        let out = dsl::parse("@agent t v1\nsteps:\n  - id: a\n    kind: llm\n");
        assert!(!out.validation.valid);
        let err = &out.validation.errors[0];
        assert!(err.message.to_lowercase().contains("trigger"));
        assert!(err.line >= 1);
        assert!(err.column >= 1);
        // still useful enough to return
        assert!(out.ast.is_some());
    }

    #[test]
    fn test_unterminated_string() {
        let out = dsl::parse("@agent u v1\ntrigger: manual\nsteps:\n  - id: a\n    kind: llm\n    prompt: \"never closed\n");
        let err = out
            .validation
            .errors
            .iter()
            .find(|d| d.message.contains("Unterminated"))
            .expect("unterminated diagnostic");
        assert_eq!(err.line, 6);
        assert_eq!(err.column, 13);
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn test_garbage_yields_no_ast() {
        let out = dsl::parse("just some prose\nwith no structure\n");
        assert!(out.ast.is_none());
        assert!(!out.validation.valid);
    }

    #[test]
    fn test_errors_sorted_by_position() {
        let out = dsl::parse("@agent s v1\nsteps:\n  - id: a\n  - kind: llm\n");
        let positions: Vec<_> = out
            .validation
            .errors
            .iter()
            .map(|d| (d.line, d.column))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_into_valid_rejects_errors() {
        let err = dsl::parse("@agent x v1\n").into_valid().unwrap_err();
        assert!(!err.valid);
        assert!(err.errors.iter().all(|d| d.severity == Severity::Error));
    }
}

// ============================================================================
// Warnings
// ============================================================================

mod warning_tests {
    use super::*;

    #[test]
    fn test_unused_save_warns() {
        let src = "@agent w v1\ntrigger: manual\nsteps:\n  - id: a\n    kind: llm\n    save: never_read\n";
        let out = dsl::parse(src);
        assert!(out.validation.valid);
        assert!(out
            .validation
            .warnings
            .iter()
            .any(|w| w.message.contains("never_read")));
    }

    #[test]
    fn test_empty_steps_warns() {
        let out = dsl::parse("@agent e v1\ntrigger: manual\n");
        assert!(out.validation.valid);
        assert!(out
            .validation
            .warnings
            .iter()
            .any(|w| w.message.contains("has no steps")));
    }

    #[test]
    fn test_unknown_section_suggests() {
        let out = dsl::parse("@agent s v1\ntrigger: manual\nouptuts:\n  a: b\n");
        let warn = out
            .validation
            .warnings
            .iter()
            .find(|w| w.message.contains("ouptuts"))
            .expect("unknown section warning");
        assert!(warn.suggestion.as_deref().unwrap_or("").contains("outputs"));
    }
}
