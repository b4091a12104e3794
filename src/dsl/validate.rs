//! Semantic checks that need the whole definition: duplicate step ids,
//! empty agents, and saved values nobody reads.

use std::collections::HashMap;

use super::ast::AgentDefinition;
use super::diagnostics::Diagnostic;
use crate::template;

/// Run every cross-section check.
pub fn check(def: &AgentDefinition) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    duplicate_steps(def, &mut out);
    empty_steps(def, &mut out);
    unused_saves(def, &mut out);
    out
}

fn duplicate_steps(def: &AgentDefinition, out: &mut Vec<Diagnostic>) {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for step in &def.steps {
        match first_seen.get(step.id.as_str()) {
            Some(&first) => out.push(
                Diagnostic::error(
                    step.line,
                    1,
                    format!(
                        "Duplicate step id '{}' (first defined on line {}, again on line {})",
                        step.id, first, step.line
                    ),
                )
                .with_suggestion("Step ids must be unique; rename one of them"),
            ),
            None => {
                first_seen.insert(&step.id, step.line);
            }
        }
    }
}

fn empty_steps(def: &AgentDefinition, out: &mut Vec<Diagnostic>) {
    if def.steps.is_empty() {
        out.push(
            Diagnostic::warning(1, 1, format!("Agent '{}' has no steps", def.id))
                .with_suggestion("Add a `steps:` section; executing this agent only renders its outputs"),
        );
    }
}

fn unused_saves(def: &AgentDefinition, out: &mut Vec<Diagnostic>) {
    let output_refs: Vec<String> = def
        .outputs
        .iter()
        .flat_map(|o| template::placeholders(&o.template))
        .collect();

    for (idx, step) in def.steps.iter().enumerate() {
        let Some(ref saved) = step.save else {
            continue;
        };

        let used_later = def.steps[idx + 1..].iter().any(|later| {
            let in_when = later
                .when
                .as_deref()
                .is_some_and(|w| template::placeholders(w).contains(saved));
            in_when || template::placeholders_in(&serde_json::Value::Object(later.config.clone())).contains(saved)
        });

        if !used_later && !output_refs.contains(saved) {
            out.push(
                Diagnostic::warning(step.line, 1, format!("Step '{}' saves '{}' but nothing reads it", step.id, saved))
                    .with_suggestion(format!(
                        "Reference it as {{{}}} in a later step or in outputs, or drop `save`",
                        saved
                    )),
            );
        }
    }
}
