//! Binding table shared by steps, templates and conditions.

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::redact::{self, REDACTED};
use crate::template;

/// Name → value store for one execution or debug session.
///
/// Insertion order is preserved. Names holding secrets are tracked so every
/// outward view ([`masked`](Self::masked)) hides them.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    values: Map<String, Value>,
    secret_names: HashSet<String>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any previous value. Last write wins.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Bind a secret value.
    pub fn set_secret(&mut self, name: impl Into<String>, value: String) {
        let name = name.into();
        self.secret_names.insert(name.clone());
        self.values.insert(name, Value::String(value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Dotted-path lookup, same rules as template placeholders.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        template::lookup(&self.values, path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secret_names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw bindings, secrets included. For template resolution and
    /// capability requests only.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Plain-text values of every bound secret.
    pub fn secret_values(&self) -> Vec<String> {
        self.secret_names
            .iter()
            .filter_map(|n| self.values.get(n))
            .map(template::render_value)
            .collect()
    }

    /// Copy safe to show to a user or write to a log: secret bindings are
    /// replaced and secret values embedded elsewhere are masked.
    pub fn masked(&self) -> Map<String, Value> {
        let secrets = self.secret_values();
        self.values
            .iter()
            .map(|(name, value)| {
                if self.secret_names.contains(name) {
                    (name.clone(), Value::String(REDACTED.to_string()))
                } else {
                    let mut value = value.clone();
                    redact::mask_json(&mut value, &secrets);
                    (name.clone(), value)
                }
            })
            .collect()
    }

    /// Mask secret values in free text.
    pub fn mask_text(&self, text: &str) -> String {
        redact::mask_known(text, &self.secret_values()).into_owned()
    }
}
