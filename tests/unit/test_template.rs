//! Unit tests for template resolution and guard conditions

use agentflow::condition::evaluate;
use agentflow::template::{self, MissingVariablePolicy, TemplateResolver};
use serde_json::{json, Map, Value};

fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// Template Tests
// ============================================================================

mod template_tests {
    use super::*;

    #[test]
    fn test_substitutes_in_text() {
        let v = vars(json!({"a": "X", "b": "Y"}));
        assert_eq!(template::render("{a} and {b}", &v), "X and Y");
    }

    #[test]
    fn test_missing_is_empty() {
        assert_eq!(template::resolve(&json!("{c}"), &Map::new()), json!(""));
    }

    #[test]
    fn test_whole_field_keeps_native_type() {
        let v = vars(json!({"n": 3, "list": [1, 2]}));
        assert_eq!(template::resolve(&json!("{n}"), &v), json!(3));
        assert_eq!(template::resolve(&json!("{list}"), &v), json!([1, 2]));
        assert_eq!(template::resolve(&json!("n={n}"), &v), json!("n=3"));
    }

    #[test]
    fn test_paths_into_objects_and_arrays() {
        let v = vars(json!({"r": {"items": [{"title": "first"}]}}));
        assert_eq!(template::render("{r.items.0.title}", &v), "first");
        assert_eq!(template::render("[{r.items.5.title}]", &v), "[]");
    }

    #[test]
    fn test_nested_config_resolved_recursively() {
        let v = vars(json!({"q": "rust"}));
        let config = json!({"query": "{q}", "opts": {"tags": ["{q}", "lang"], "k": 5}});
        assert_eq!(
            template::resolve(&config, &v),
            json!({"query": "rust", "opts": {"tags": ["rust", "lang"], "k": 5}})
        );
    }

    #[test]
    fn test_json_braces_untouched() {
        let v = vars(json!({"x": 1}));
        assert_eq!(template::render(r#"{"key": {x}}"#, &v), r#"{"key": 1}"#);
    }

    #[test]
    fn test_keep_policy() {
        let resolver = TemplateResolver::new(MissingVariablePolicy::Keep);
        assert_eq!(resolver.render("hi {who}", &Map::new()), "hi {who}");
    }
}

// ============================================================================
// Condition Tests
// ============================================================================

mod condition_tests {
    use super::*;

    #[test]
    fn test_equality_with_literal() {
        assert!(evaluate("{x} == 'yes'", &vars(json!({"x": "yes"}))));
        assert!(!evaluate("{x} != 'yes'", &vars(json!({"x": "yes"}))));
    }

    #[test]
    fn test_missing_is_falsy() {
        assert!(!evaluate("{missing}", &Map::new()));
    }

    #[test]
    fn test_and_short_circuits_on_empty() {
        assert!(!evaluate("{a} && {b}", &vars(json!({"a": "1", "b": ""}))));
        assert!(evaluate("{a} || {b}", &vars(json!({"a": "", "b": "1"}))));
    }

    #[test]
    fn test_left_to_right_without_precedence() {
        // ((true || false) && false) == false
        let v = vars(json!({"t": "1", "f": ""}));
        assert!(!evaluate("{t} || {f} && {f}", &v));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(evaluate("{n} == 3", &vars(json!({"n": 3.0}))));
        assert!(evaluate("{n} == '3.0'", &vars(json!({"n": 3}))));
    }

    #[test]
    fn test_operators_inside_quotes_are_literal() {
        assert!(evaluate("{op} == 'a && b'", &vars(json!({"op": "a && b"}))));
    }
}
