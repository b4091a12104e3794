//! Template resolution for `{name}` / `{name.path}` placeholders.
//!
//! Placeholders are resolved against the binding table. A field that is a
//! single placeholder and nothing else keeps the bound value's JSON type;
//! placeholders embedded in longer text are rendered as text. Braces that do
//! not form a valid placeholder (JSON bodies, `{ }`) pass through untouched.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
static WHOLE_PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*)\s*\}").unwrap()
    })
}

fn whole_placeholder_regex() -> &'static Regex {
    WHOLE_PLACEHOLDER.get_or_init(|| {
        Regex::new(r"^\{\s*([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*)\s*\}$").unwrap()
    })
}

/// What to do with a placeholder whose variable is not bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingVariablePolicy {
    /// Substitute an empty string.
    #[default]
    Empty,
    /// Leave the placeholder text as written.
    Keep,
}

/// Resolves templates against a set of bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResolver {
    policy: MissingVariablePolicy,
}

impl TemplateResolver {
    pub fn new(policy: MissingVariablePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingVariablePolicy {
        self.policy
    }

    /// Resolve every string leaf of `value`, recursing into arrays and
    /// objects. Non-string leaves are returned unchanged.
    pub fn resolve(&self, value: &Value, vars: &Map<String, Value>) -> Value {
        match value {
            Value::String(s) => self.resolve_str(s, vars),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v, vars)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v, vars)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a single string field.
    pub fn resolve_str(&self, text: &str, vars: &Map<String, Value>) -> Value {
        if let Some(caps) = whole_placeholder_regex().captures(text) {
            return match lookup(vars, &caps[1]) {
                Some(v) => v.clone(),
                None => Value::String(self.missing(text)),
            };
        }
        Value::String(self.render(text, vars))
    }

    /// Substitute every placeholder as text.
    pub fn render(&self, text: &str, vars: &Map<String, Value>) -> String {
        placeholder_regex()
            .replace_all(text, |caps: &Captures| match lookup(vars, &caps[1]) {
                Some(v) => render_value(v),
                None => self.missing(&caps[0]),
            })
            .into_owned()
    }

    fn missing(&self, original: &str) -> String {
        match self.policy {
            MissingVariablePolicy::Empty => String::new(),
            MissingVariablePolicy::Keep => original.to_string(),
        }
    }
}

/// Resolve with the default policy (missing variables become `""`).
pub fn resolve(value: &Value, vars: &Map<String, Value>) -> Value {
    TemplateResolver::default().resolve(value, vars)
}

/// Render with the default policy.
pub fn render(text: &str, vars: &Map<String, Value>) -> String {
    TemplateResolver::default().render(text, vars)
}

/// Follow a dotted path through the bindings. Numeric segments index arrays.
pub fn lookup<'v>(vars: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for seg in segments {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form of a bound value: strings as-is, `null` as empty, containers
/// as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Root variable names referenced by placeholders in `text`, in order of
/// first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(text) {
        let root = caps[1].split('.').next().unwrap_or_default().to_string();
        if !names.contains(&root) {
            names.push(root);
        }
    }
    names
}

/// Root names referenced anywhere inside a JSON value.
pub fn placeholders_in(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect(value, &mut names);
    names
}

fn collect(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for n in placeholders(s) {
                if !names.contains(&n) {
                    names.push(n);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect(v, names)),
        _ => {}
    }
}
