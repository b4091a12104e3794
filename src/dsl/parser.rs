//! Parser -- gives the node tree its agent meaning.
//!
//! Directives (`@agent`, `@end`) are handled here, line by line; everything
//! between them goes through the [`TreeBuilder`] and is then mapped section
//! by section onto an [`AgentDefinition`]. Problems are collected as
//! diagnostics rather than returned as errors, so a single pass reports as
//! much as possible.

use serde_json::{Map, Value};

use super::ast::{
    AgentDefinition, OutputSpec, SecretDecl, Step, StepNotation, Trigger, VarSource, VarType,
    VariableSpec,
};
use super::diagnostics::Diagnostic;
use super::lexer::{Line, Scalar, Token};
use super::tree::{Entry, Node, StepHead, TreeBuilder};

/// Top-level sections the parser understands.
pub const KNOWN_SECTIONS: &[&str] = &["description", "trigger", "secrets", "vars", "steps", "outputs"];

const VAR_FIELDS: &[&str] = &["type", "source", "required", "default", "description"];

/// Parser over lexed lines.
#[derive(Debug)]
pub struct Parser<'a> {
    lines: &'a [Line],
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
struct Header {
    id: String,
    version: String,
    line: usize,
}

impl<'a> Parser<'a> {
    pub fn new(lines: &'a [Line]) -> Self {
        Self {
            lines,
            diagnostics: Vec::new(),
        }
    }

    /// Parse into a definition. The definition is `None` only when nothing
    /// agent-like (header, trigger, steps) was found.
    pub fn parse(mut self) -> (Option<AgentDefinition>, Vec<Diagnostic>) {
        let (header, body) = self.split_directives();

        let (entries, tree_diags) = TreeBuilder::new(&body).build();
        self.diagnostics.extend(tree_diags);

        let mut def = AgentDefinition {
            id: String::new(),
            version: String::new(),
            description: None,
            trigger: Trigger::default(),
            secrets: Vec::new(),
            vars: Vec::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
        };
        let mut seen: Vec<&str> = Vec::new();
        let mut has_trigger = false;
        let mut has_steps = false;

        for entry in &entries {
            if entry.header.is_some() {
                has_steps = true;
                if let Some(step) = self.flat_step(entry) {
                    def.steps.push(step);
                }
                continue;
            }

            let key = entry.key.as_str();
            if let Some(known) = KNOWN_SECTIONS.iter().find(|k| **k == key) {
                if seen.contains(known) {
                    self.diagnostics.push(
                        Diagnostic::warning(entry.line, entry.column, format!("Section '{}' appears more than once", key))
                            .with_suggestion("Merge the sections; later entries are appended or take precedence"),
                    );
                } else {
                    seen.push(*known);
                }
            }

            match key {
                "description" => def.description = self.text_of(entry),
                "trigger" => {
                    has_trigger = true;
                    def.trigger = self.trigger(entry);
                }
                "secrets" => {
                    let secrets = self.secrets(entry);
                    def.secrets.extend(secrets);
                }
                "vars" => {
                    let vars = self.vars(entry);
                    def.vars.extend(vars);
                }
                "steps" => {
                    has_steps = true;
                    let steps = self.steps(entry);
                    def.steps.extend(steps);
                }
                "outputs" => {
                    let outputs = self.outputs(entry);
                    def.outputs.extend(outputs);
                }
                other => self.unknown_section(entry, other),
            }
        }

        let found_header = header.is_some();
        if let Some(h) = header {
            def.id = h.id;
            def.version = h.version;
            if !has_trigger {
                self.diagnostics.push(
                    Diagnostic::error(h.line, 1, "Missing trigger section")
                        .with_suggestion("Declare how the agent is invoked, e.g. `trigger: manual`"),
                );
            }
        } else if !has_trigger && has_steps {
            self.diagnostics.push(
                Diagnostic::error(1, 1, "Missing trigger section")
                    .with_suggestion("Declare how the agent is invoked, e.g. `trigger: manual`"),
            );
        }

        if found_header || has_trigger || has_steps {
            def.trigger.line = def.trigger.line.max(1);
            (Some(def), self.diagnostics)
        } else {
            (None, self.diagnostics)
        }
    }

    /// Consume `@` directives and return the header plus the lines between
    /// the header and `@end`.
    fn split_directives(&mut self) -> (Option<Header>, Vec<Line>) {
        let mut header: Option<Header> = None;
        let mut body = Vec::new();
        let mut ended_at: Option<usize> = None;

        for line in self.lines {
            if let Some(end_line) = ended_at {
                self.diagnostics.push(
                    Diagnostic::warning(line.number, line.column(), "Content after @end is ignored")
                        .with_context(&line.text)
                        .with_suggestion(format!("Move this content above the @end on line {}, or delete it", end_line)),
                );
                break;
            }

            let Token::Directive { name, args } = &line.token else {
                body.push(line.clone());
                continue;
            };

            match name.as_str() {
                "agent" => {
                    if let Some(ref first) = header {
                        self.diagnostics.push(
                            Diagnostic::error(line.number, line.column(), "Repeated @agent header")
                                .with_context(&line.text)
                                .with_suggestion(format!(
                                    "One agent per source; the header on line {} is kept",
                                    first.line
                                )),
                        );
                        continue;
                    }
                    header = Some(self.header(line, args));
                }
                "end" => ended_at = Some(line.number),
                other => self.diagnostics.push(
                    Diagnostic::warning(line.number, line.column(), format!("Unknown directive '@{}' ignored", other))
                        .with_context(&line.text)
                        .with_suggestion("Known directives are @agent and @end"),
                ),
            }
        }

        if header.is_none() {
            let (line, column) = self.lines.first().map(|l| (l.number, l.column())).unwrap_or((1, 1));
            self.diagnostics.push(
                Diagnostic::error(line, column, "Missing @agent header")
                    .with_suggestion("Start the source with `@agent <id> <version>`"),
            );
        }

        (header, body)
    }

    fn header(&mut self, line: &Line, args: &[String]) -> Header {
        let usage = "Use `@agent <id> <version>`, e.g. `@agent hello v1`";
        let id = args.first().cloned().unwrap_or_default();
        let version = args.get(1).cloned().unwrap_or_default();

        if id.is_empty() || version.is_empty() {
            let what = if id.is_empty() { "id and version" } else { "version" };
            self.diagnostics.push(
                Diagnostic::error(line.number, line.column(), format!("Malformed @agent header: missing {}", what))
                    .with_context(&line.text)
                    .with_suggestion(usage),
            );
        } else if args.len() > 2 {
            self.diagnostics.push(
                Diagnostic::warning(line.number, line.column(), format!("Ignoring extra @agent arguments: {}", args[2..].join(" ")))
                    .with_context(&line.text)
                    .with_suggestion(usage),
            );
        }

        Header {
            id,
            version,
            line: line.number,
        }
    }

    fn text_of(&mut self, entry: &Entry) -> Option<String> {
        match &entry.value {
            Node::Scalar(s) => Some(s.as_text()),
            Node::Empty => None,
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(entry.line, entry.column, format!("'{}' must be a single value", entry.key))
                        .with_suggestion("Quote the text or use a `|` block"),
                );
                None
            }
        }
    }

    fn trigger(&mut self, entry: &Entry) -> Trigger {
        let mut trigger = Trigger {
            line: entry.line,
            ..Trigger::default()
        };
        match &entry.value {
            Node::Scalar(s) => trigger.spec = Some(s.as_text()),
            Node::Map(fields) => {
                for f in fields {
                    trigger.fields.insert(f.key.clone(), f.value.to_value());
                }
            }
            Node::Empty => self.diagnostics.push(
                Diagnostic::error(entry.line, entry.column, "Trigger section is empty")
                    .with_suggestion("Describe the trigger inline (`trigger: manual`) or as an indented block"),
            ),
            Node::List(_) => self.diagnostics.push(
                Diagnostic::error(entry.line, entry.column, "Trigger must be a value or a block of fields, not a list")
                    .with_suggestion("Write `trigger:` followed by indented `key: value` lines"),
            ),
        }
        trigger
    }

    fn secrets(&mut self, entry: &Entry) -> Vec<SecretDecl> {
        let mut out = Vec::new();
        match &entry.value {
            Node::List(items) => {
                for item in items {
                    match &item.value {
                        Node::Scalar(s) => out.push(secret_decl(s.as_text(), None, item.line)),
                        Node::Map(fields) => {
                            for f in fields {
                                let source = f.value.as_scalar().map(Scalar::as_text);
                                out.push(secret_decl(f.key.clone(), source, f.line));
                            }
                        }
                        _ => self.diagnostics.push(
                            Diagnostic::error(item.line, item.column, "Secret entries must be `NAME` or `NAME: env:VAR`")
                                .with_suggestion("Write `- OPENAI_KEY: env:OPENAI_API_KEY`"),
                        ),
                    }
                }
            }
            Node::Map(fields) => {
                for f in fields {
                    let source = f.value.as_scalar().map(Scalar::as_text);
                    out.push(secret_decl(f.key.clone(), source, f.line));
                }
            }
            Node::Empty => {}
            Node::Scalar(_) => self.diagnostics.push(
                Diagnostic::error(entry.line, entry.column, "Secrets must be a list")
                    .with_suggestion("Write each secret on its own `- NAME` line"),
            ),
        }
        out
    }

    fn vars(&mut self, entry: &Entry) -> Vec<VariableSpec> {
        let fields = match &entry.value {
            Node::Map(fields) => fields,
            Node::Empty => return Vec::new(),
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(entry.line, entry.column, "Variables must be a block of `name:` entries")
                        .with_suggestion("Write `vars:` followed by indented `name: type` lines"),
                );
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for f in fields {
            let mut spec = VariableSpec::new(f.key.clone(), f.line);
            match &f.value {
                Node::Empty => {}
                // `name: string` sets the type; anything else is a default.
                Node::Scalar(Scalar::Plain(text)) if VarType::parse(text).is_some() => {
                    spec.var_type = VarType::parse(text).unwrap_or_default();
                }
                Node::Scalar(s) => spec.default = Some(s.to_value()),
                Node::Map(props) => self.var_props(&mut spec, props),
                Node::List(_) => spec.default = Some(f.value.to_value()),
            }
            out.push(spec);
        }
        out
    }

    fn var_props(&mut self, spec: &mut VariableSpec, props: &[Entry]) {
        for p in props {
            match p.key.as_str() {
                "type" => {
                    let text = p.value.as_scalar().map(Scalar::as_text).unwrap_or_default();
                    match VarType::parse(&text) {
                        Some(t) => spec.var_type = t,
                        None => self.diagnostics.push(
                            Diagnostic::warning(p.line, p.column, format!("Unknown variable type '{}'", text))
                                .with_suggestion("Use one of: string, number, boolean, array, object"),
                        ),
                    }
                }
                "source" => {
                    let text = p.value.as_scalar().map(Scalar::as_text).unwrap_or_default();
                    match VarSource::parse(&text) {
                        Some(s) => spec.source = s,
                        None => self.diagnostics.push(
                            Diagnostic::warning(p.line, p.column, format!("Unknown variable source '{}'", text))
                                .with_suggestion("Use one of: input, env, literal, computed"),
                        ),
                    }
                }
                "required" => match p.value.to_value() {
                    Value::Bool(b) => spec.required = b,
                    other => self.diagnostics.push(
                        Diagnostic::warning(p.line, p.column, format!("`required` should be true or false, found {}", other))
                            .with_suggestion("Write `required: true`"),
                    ),
                },
                "default" => spec.default = Some(p.value.to_value()),
                "description" => {}
                other => {
                    let mut d = Diagnostic::warning(p.line, p.column, format!("Unknown variable field '{}' ignored", other));
                    if let Some(s) = did_you_mean(other, VAR_FIELDS) {
                        d = d.with_suggestion(format!("Did you mean '{}'?", s));
                    }
                    self.diagnostics.push(d);
                }
            }
        }
    }

    fn steps(&mut self, entry: &Entry) -> Vec<Step> {
        let mut out = Vec::new();
        match &entry.value {
            Node::List(items) => {
                for item in items {
                    match &item.value {
                        Node::Map(fields) => {
                            if let Some(step) = self.build_step(None, fields, None, item.line, item.column, StepNotation::List) {
                                out.push(step);
                            }
                        }
                        _ => self.diagnostics.push(
                            Diagnostic::error(item.line, item.column, "Step must be a block of fields")
                                .with_suggestion("Write `- id: <id>` followed by `kind: <kind>` on the next line"),
                        ),
                    }
                }
            }
            // `steps:` holding flat `step <id>:` headers (or `<id>:` blocks).
            Node::Map(fields) => {
                for f in fields {
                    if let Some(step) = self.flat_step(f) {
                        out.push(step);
                    }
                }
            }
            Node::Empty => {}
            Node::Scalar(_) => self.diagnostics.push(
                Diagnostic::error(entry.line, entry.column, "Steps must be a list")
                    .with_suggestion("Write each step as `- id: <id>` under `steps:`"),
            ),
        }
        out
    }

    fn flat_step(&mut self, entry: &Entry) -> Option<Step> {
        let empty = Vec::new();
        let fields = match &entry.value {
            Node::Map(fields) => fields,
            Node::Empty => &empty,
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(entry.line, entry.column, format!("Step '{}' must be followed by an indented block of fields", entry.key))
                        .with_suggestion("Write `step <id>: <kind> [provider]` and indent the fields below it"),
                );
                return None;
            }
        };
        self.build_step(
            Some(entry.key.clone()),
            fields,
            entry.header.as_ref(),
            entry.line,
            entry.column,
            StepNotation::Flat,
        )
    }

    fn build_step(
        &mut self,
        id: Option<String>,
        fields: &[Entry],
        head: Option<&StepHead>,
        line: usize,
        column: usize,
        notation: StepNotation,
    ) -> Option<Step> {
        let field = |name: &str| fields.iter().find(|f| f.key == name);
        let text = |name: &str| field(name).and_then(|f| f.value.as_scalar()).map(Scalar::as_text);

        let id = id.or_else(|| text("id")).filter(|s| !s.trim().is_empty());
        let Some(id) = id else {
            self.diagnostics.push(
                Diagnostic::error(line, column, "Step is missing `id`")
                    .with_suggestion("Give every step a unique `id: <name>`"),
            );
            return None;
        };

        let kind = head
            .and_then(|h| h.kind.clone())
            .or_else(|| text("kind"))
            .or_else(|| text("type"))
            .filter(|s| !s.trim().is_empty());
        let Some(kind) = kind else {
            self.diagnostics.push(
                Diagnostic::error(line, column, format!("Step '{}' is missing `kind`", id))
                    .with_suggestion("Add `kind: llm` (or http, vision, function, ...)"),
            );
            return None;
        };

        let provider = head.and_then(|h| h.provider.clone()).or_else(|| text("provider"));

        let mut retries = 0;
        if let Some(f) = field("retries") {
            match f.value.to_value().as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => retries = n,
                None => self.diagnostics.push(
                    Diagnostic::error(f.line, f.column, format!("Step '{}': `retries` must be a non-negative integer", id))
                        .with_suggestion("Write e.g. `retries: 2`"),
                ),
            }
        }

        let mut timeout_ms = None;
        if let Some(f) = field("timeout_ms") {
            match f.value.to_value().as_u64().filter(|n| *n > 0) {
                Some(n) => timeout_ms = Some(n),
                None => self.diagnostics.push(
                    Diagnostic::error(f.line, f.column, format!("Step '{}': `timeout_ms` must be a positive integer", id))
                        .with_suggestion("Write the timeout in milliseconds, e.g. `timeout_ms: 5000`"),
                ),
            }
        }

        let mut config = Map::new();
        for f in fields {
            if Step::RESERVED_KEYS.contains(&f.key.as_str()) {
                continue;
            }
            // An explicit `config:` block is folded into the step config.
            if f.key == "config" {
                if let Value::Object(inner) = f.value.to_value() {
                    for (k, v) in inner {
                        config.entry(k).or_insert(v);
                    }
                    continue;
                }
            }
            config.insert(f.key.clone(), f.value.to_value());
        }

        Some(Step {
            id,
            kind,
            provider,
            config,
            when: text("when"),
            retries,
            timeout_ms,
            save: text("save").filter(|s| !s.trim().is_empty()),
            line,
            notation,
        })
    }

    fn outputs(&mut self, entry: &Entry) -> Vec<OutputSpec> {
        let fields = match &entry.value {
            Node::Map(fields) => fields,
            Node::Empty => return Vec::new(),
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(entry.line, entry.column, "Outputs must be a block of `name: template` entries")
                        .with_suggestion("Write `outputs:` followed by `response: \"{greeting}\"`"),
                );
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for f in fields {
            let template = match &f.value {
                Node::Scalar(s) => s.as_text(),
                Node::Empty => String::new(),
                other => {
                    self.diagnostics.push(
                        Diagnostic::error(f.line, f.column, format!("Output '{}' must be a single template", f.key))
                            .with_suggestion("Quote the template, e.g. `\"{result}\"`"),
                    );
                    other.to_value().to_string()
                }
            };
            out.push(OutputSpec {
                name: f.key.clone(),
                template,
                line: f.line,
            });
        }
        out
    }

    fn unknown_section(&mut self, entry: &Entry, key: &str) {
        let mut d = Diagnostic::warning(entry.line, entry.column, format!("Unknown section '{}' ignored", key));
        if let Some(s) = did_you_mean(key, KNOWN_SECTIONS) {
            d = d.with_suggestion(format!("Did you mean '{}'?", s));
        }
        self.diagnostics.push(d);
    }
}

fn secret_decl(name: String, source: Option<String>, line: usize) -> SecretDecl {
    let source = match source.filter(|s| !s.trim().is_empty()) {
        Some(s) if s.contains(':') => s,
        Some(s) => format!("env:{}", s),
        None => format!("env:{}", name),
    };
    SecretDecl { name, source, line }
}

/// Closest known word within two edits, if any.
pub fn did_you_mean<'k>(word: &str, known: &[&'k str]) -> Option<&'k str> {
    let lower = word.to_lowercase();
    known
        .iter()
        .map(|k| (edit_distance(&lower, k), *k))
        .filter(|(d, k)| *d <= 2 || k.starts_with(&lower) || lower.starts_with(k))
        .min_by_key(|(d, _)| *d)
        .map(|(_, k)| k)
}

/// Levenshtein distance between two strings.
#[allow(clippy::needless_range_loop)]
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let m = a.len();
    let n = b.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut dp = vec![vec![0; n + 1]; m + 1];
    for i in 0..=m {
        dp[i][0] = i;
    }
    for j in 0..=n {
        dp[0][j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }

    dp[m][n]
}
