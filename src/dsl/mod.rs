//! Agent DSL - declarative source format for multi-step agents
//!
//! Line and indentation oriented, in the spirit of YAML but much smaller.
//!
//! # Syntax Example
//!
//! ```text
//! @agent hello v1
//! trigger: http POST /hello
//! vars:
//!   name:
//!     type: string
//!     default: World
//! steps:
//!   - id: greet
//!     kind: llm
//!     provider: openai
//!     prompt: "Say hello to {name}"
//!     save: greeting
//! outputs:
//!   response: "{greeting}"
//! ```
//!
//! Steps may also be written flat: `step greet: llm openai` followed by an
//! indented block of fields.

pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod tree;
pub mod validate;

pub use ast::{
    AgentDefinition, OutputSpec, SecretDecl, Step, StepNotation, Trigger, VarSource, VarType,
    VariableSpec,
};
pub use diagnostics::{Diagnostic, Severity, ValidationResult};
pub use lexer::Lexer;
pub use parser::Parser;

use serde::Serialize;
use tracing::debug;

/// Result of [`parse`]: the definition (when one was recognizable) and
/// every diagnostic found along the way.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutput {
    pub ast: Option<AgentDefinition>,
    pub validation: ValidationResult,
}

impl ParseOutput {
    /// The definition, only if it parsed without errors.
    pub fn into_valid(self) -> Result<AgentDefinition, ValidationResult> {
        match self.ast {
            Some(def) if self.validation.valid => Ok(def),
            _ => {
                let mut validation = self.validation;
                validation.valid = false;
                Err(validation)
            }
        }
    }
}

/// Parse and validate agent source. Never panics; malformed input is
/// reported through `validation`.
pub fn parse(source: &str) -> ParseOutput {
    let (lines, lex_diags) = Lexer::new(source).tokenize();
    let mut validation = ValidationResult::default();
    validation.extend(lex_diags);

    let (ast, parse_diags) = Parser::new(&lines).parse();
    validation.extend(parse_diags);

    if let Some(ref def) = ast {
        validation.extend(validate::check(def));
    }
    validation.sort();

    debug!(
        lines = lines.len(),
        errors = validation.errors.len(),
        warnings = validation.warnings.len(),
        "parsed agent source"
    );

    ParseOutput { ast, validation }
}
