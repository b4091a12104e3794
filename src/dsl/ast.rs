//! AST -- the agent definition produced by the parser.
//!
//! Both step notations (`step <id>: kind provider` blocks and `steps:` lists
//! of maps) normalize into the same [`Step`] value; the engine never needs
//! to know which one the author used.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A parsed, immutable agent definition.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDefinition {
    pub id: String,
    pub version: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    pub secrets: Vec<SecretDecl>,
    pub vars: Vec<VariableSpec>,
    pub steps: Vec<Step>,
    pub outputs: Vec<OutputSpec>,
}

impl AgentDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Index of a step in execution order.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.vars.iter().find(|v| v.name == name)
    }
}

/// Transport metadata describing how the agent is invoked.
///
/// Opaque to the engine: `trigger: http POST /hello` keeps the inline text
/// in `spec`, a block form fills `fields`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trigger {
    pub spec: Option<String>,
    pub fields: Map<String, Value>,
    pub line: usize,
}

/// A named secret and where to fetch it from (`env:NAME`, or a bare name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretDecl {
    pub name: String,
    pub source: String,
    pub line: usize,
}

/// Declared type of a variable. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl VarType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(VarType::String),
            "number" | "int" | "integer" | "float" => Some(VarType::Number),
            "boolean" | "bool" => Some(VarType::Boolean),
            "array" | "list" => Some(VarType::Array),
            "object" | "map" => Some(VarType::Object),
            _ => None,
        }
    }
}

/// Where a variable's value comes from at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarSource {
    #[default]
    Input,
    Env,
    Literal,
    Computed,
}

impl VarSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" => Some(VarSource::Input),
            "env" | "environment" => Some(VarSource::Env),
            "literal" | "const" => Some(VarSource::Literal),
            "computed" => Some(VarSource::Computed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    pub source: VarSource,
    pub required: bool,
    pub default: Option<Value>,
    pub line: usize,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            var_type: VarType::default(),
            source: VarSource::default(),
            required: false,
            default: None,
            line,
        }
    }
}

/// Which surface syntax a step was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepNotation {
    /// `step <id>: <kind> [provider]` followed by an indented field block.
    Flat,
    /// `- id: ...` entry under a `steps:` list.
    List,
}

/// One unit of work, dispatched to the capability registered for
/// `(kind, provider)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub id: String,
    pub kind: String,
    pub provider: Option<String>,
    /// Every field that is not one of the reserved step keys. String leaves
    /// may contain `{templates}`.
    pub config: Map<String, Value>,
    pub when: Option<String>,
    pub retries: u32,
    pub timeout_ms: Option<u64>,
    pub save: Option<String>,
    pub line: usize,
    pub notation: StepNotation,
}

impl Step {
    /// Keys that configure the step itself rather than its capability.
    pub const RESERVED_KEYS: &'static [&'static str] = &[
        "id",
        "kind",
        "type",
        "provider",
        "when",
        "retries",
        "timeout_ms",
        "save",
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(ref provider) => write!(f, "{} ({}/{})", self.id, self.kind, provider),
            None => write!(f, "{} ({})", self.id, self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSpec {
    pub name: String,
    pub template: String,
    pub line: usize,
}
