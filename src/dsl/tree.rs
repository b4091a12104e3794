//! Tree builder -- folds indented [`Line`]s into nested maps and lists.
//!
//! This stage knows nothing about agents; it only understands nesting. The
//! parser walks the resulting [`Node`] tree and gives sections meaning.

use serde_json::{Map, Number, Value};

use super::diagnostics::Diagnostic;
use super::lexer::{ItemBody, Line, Scalar, Token};

/// A structural node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Map(Vec<Entry>),
    List(Vec<Item>),
    /// `key:` with nothing nested beneath it.
    Empty,
}

/// `key: value` inside a map, with the position of the key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Node,
    pub line: usize,
    pub column: usize,
    /// Set when the entry came from a `step <id>: kind provider` header.
    pub header: Option<StepHead>,
}

/// Kind and provider written inline on a flat step header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepHead {
    pub kind: Option<String>,
    pub provider: Option<String>,
}

/// One `- ` element of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub value: Node,
    pub line: usize,
    pub column: usize,
}

impl Scalar {
    /// Convert to JSON. Plain scalars are typed; quoted and block scalars
    /// always stay strings.
    pub fn to_value(&self) -> Value {
        match self {
            Scalar::Plain(s) => plain_to_value(s),
            Scalar::Quoted(s) | Scalar::Block(s) => Value::String(s.clone()),
            Scalar::List(items) => Value::Array(items.iter().map(Scalar::to_value).collect()),
        }
    }

    /// Text form, for places that only take strings (ids, templates).
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Plain(s) | Scalar::Quoted(s) | Scalar::Block(s) => s.clone(),
            Scalar::List(_) => self.to_value().to_string(),
        }
    }
}

fn plain_to_value(s: &str) -> Value {
    match s {
        "" | "~" => return Value::Null,
        _ if s.eq_ignore_ascii_case("null") => return Value::Null,
        _ if s.eq_ignore_ascii_case("true") => return Value::Bool(true),
        _ if s.eq_ignore_ascii_case("false") => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    let numeric = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric && s.chars().any(|c| c.is_ascii_digit()) {
        if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(s.to_string())
}

impl Node {
    pub fn to_value(&self) -> Value {
        match self {
            Node::Scalar(s) => s.to_value(),
            Node::Map(entries) => {
                let mut map = Map::new();
                for e in entries {
                    map.insert(e.key.clone(), e.value.to_value());
                }
                Value::Object(map)
            }
            Node::List(items) => Value::Array(items.iter().map(|i| i.value.to_value()).collect()),
            Node::Empty => Value::Null,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// Builds a [`Node`] tree out of lexed lines.
#[derive(Debug)]
pub struct TreeBuilder<'a> {
    lines: &'a [Line],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(lines: &'a [Line]) -> Self {
        Self {
            lines,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Build the root map. Root content is expected at indentation 0;
    /// anything else is reported and skipped.
    pub fn build(mut self) -> (Vec<Entry>, Vec<Diagnostic>) {
        let mut root = Vec::new();
        while let Some(line) = self.current() {
            if line.indent > 0 {
                self.unexpected_indentation(line, 0);
                continue;
            }
            match self.parse_block(0) {
                Node::Map(entries) => root.extend(entries),
                Node::List(items) => {
                    for item in items {
                        self.diagnostics.push(
                            Diagnostic::error(item.line, item.column, "List item outside of any section")
                                .with_suggestion("Put the item under a section such as `steps:`"),
                        );
                    }
                }
                _ => {}
            }
        }
        (root, self.diagnostics)
    }

    fn current(&self) -> Option<&'a Line> {
        self.lines.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Line> {
        let line = self.current();
        self.pos += 1;
        line
    }

    /// Parse whatever block starts at the current line, provided it is
    /// indented at least `min_indent`.
    fn parse_block(&mut self, min_indent: usize) -> Node {
        let Some(line) = self.current() else {
            return Node::Empty;
        };
        if line.indent < min_indent {
            return Node::Empty;
        }
        match line.token {
            Token::Item { .. } => self.parse_list(line.indent),
            _ => self.parse_map(line.indent, Vec::new()),
        }
    }

    fn parse_map(&mut self, indent: usize, mut entries: Vec<Entry>) -> Node {
        while let Some(line) = self.current() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                self.unexpected_indentation(line, indent);
                continue;
            }

            match &line.token {
                Token::Entry { key, value } => {
                    self.advance();
                    let value = self.entry_value(value.clone(), indent, line);
                    entries.push(Entry {
                        key: key.clone(),
                        value,
                        line: line.number,
                        column: line.column(),
                        header: None,
                    });
                }
                Token::StepHeader { id, kind, provider } => {
                    self.advance();
                    let value = self.entry_value(None, indent, line);
                    entries.push(Entry {
                        key: id.clone(),
                        value,
                        line: line.number,
                        column: line.column(),
                        header: Some(StepHead {
                            kind: kind.clone(),
                            provider: provider.clone(),
                        }),
                    });
                }
                Token::Item { .. } => {
                    // A list can only follow `key:` directly.
                    self.diagnostics.push(
                        Diagnostic::error(line.number, line.column(), "List item where a `key: value` entry was expected")
                            .with_context(&line.text)
                            .with_suggestion("Start the list right after a line ending in ':'"),
                    );
                    self.advance();
                    self.skip_deeper_than(indent);
                }
                Token::Text(text) => {
                    self.diagnostics.push(
                        Diagnostic::error(line.number, line.column(), format!("Expected `key: value`, found '{}'", text))
                            .with_context(&line.text)
                            .with_suggestion("Separate the key and value with ': '"),
                    );
                    self.advance();
                    self.skip_deeper_than(indent);
                }
                Token::Directive { name, .. } => {
                    self.diagnostics.push(
                        Diagnostic::error(line.number, line.column(), format!("Directive '@{}' is only allowed at the top level", name))
                            .with_context(&line.text),
                    );
                    self.advance();
                }
            }
        }
        Node::Map(entries)
    }

    fn parse_list(&mut self, indent: usize) -> Node {
        let mut items = Vec::new();
        while let Some(line) = self.current() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                self.unexpected_indentation(line, indent);
                continue;
            }
            let Token::Item { content_indent, body } = &line.token else {
                break;
            };
            self.advance();

            let value = match body {
                ItemBody::Empty => self.nested(indent),
                ItemBody::Scalar(s) => {
                    self.reject_children(line, indent);
                    Node::Scalar(s.clone())
                }
                ItemBody::Entry { key, value } => {
                    let first = Entry {
                        key: key.clone(),
                        value: self.entry_value(value.clone(), *content_indent, line),
                        line: line.number,
                        column: content_indent + 1,
                        header: None,
                    };
                    match self.current() {
                        Some(next) if next.indent == *content_indent && !matches!(next.token, Token::Item { .. }) => {
                            self.parse_map(*content_indent, vec![first])
                        }
                        _ => Node::Map(vec![first]),
                    }
                }
            };
            items.push(Item {
                value,
                line: line.number,
                column: line.column(),
            });
        }
        Node::List(items)
    }

    /// Value for an entry whose key sits at `indent`.
    fn entry_value(&mut self, value: Option<Scalar>, indent: usize, line: &Line) -> Node {
        match value {
            Some(scalar) => {
                self.reject_children(line, indent);
                Node::Scalar(scalar)
            }
            None => match self.current() {
                Some(next) if next.indent > indent => self.parse_block(indent + 1),
                // `key:` followed by `- item` at the same indentation.
                Some(next) if next.indent == indent && matches!(next.token, Token::Item { .. }) => {
                    self.parse_list(indent)
                }
                _ => Node::Empty,
            },
        }
    }

    fn nested(&mut self, indent: usize) -> Node {
        match self.current() {
            Some(next) if next.indent > indent => self.parse_block(indent + 1),
            _ => Node::Empty,
        }
    }

    /// A scalar value cannot own an indented block.
    fn reject_children(&mut self, owner: &Line, indent: usize) {
        if let Some(next) = self.current() {
            if next.indent > indent {
                self.diagnostics.push(
                    Diagnostic::error(next.number, next.column(), "Unexpected indentation")
                        .with_context(&next.text)
                        .with_suggestion(format!(
                            "Line {} already has a value; remove the value after ':' to nest a block, or dedent this line",
                            owner.number
                        )),
                );
                self.skip_deeper_than(indent);
            }
        }
    }

    fn unexpected_indentation(&mut self, line: &Line, indent: usize) {
        self.diagnostics.push(
            Diagnostic::error(line.number, line.column(), "Unexpected indentation")
                .with_context(&line.text)
                .with_suggestion(format!("Align this line to column {} or nest it under a key ending in ':'", indent + 1)),
        );
        self.skip_deeper_than(indent);
    }

    fn skip_deeper_than(&mut self, indent: usize) {
        while let Some(line) = self.current() {
            if line.indent > indent {
                self.advance();
            } else {
                break;
            }
        }
    }
}
