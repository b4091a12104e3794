//! Lexer -- turns agent source text into a sequence of classified [`Line`]s.
//!
//! The DSL is line and indentation oriented, so the lexer works one
//! physical line at a time: it measures indentation, strips comments,
//! classifies the line (directive, `key: value` entry, flat step header,
//! list item) and scans its scalar value. Block scalars (`|`, `|-`) are the
//! one construct that spans lines; the lexer folds their body into a single
//! [`Scalar::Block`] so later stages only ever see one line per token.

use super::diagnostics::Diagnostic;

/// A scalar value as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Unquoted text; typed later (number, bool, null, or string).
    Plain(String),
    /// Single- or double-quoted text with escapes processed. Always a string.
    Quoted(String),
    /// Body of a `|` / `|-` block scalar, de-indented.
    Block(String),
    /// Flow list: `[a, "b", 3]`.
    List(Vec<Scalar>),
}

/// Body of a `- ` list item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemBody {
    /// `-` alone; the item's content is on the following, deeper lines.
    Empty,
    /// `- value`
    Scalar(Scalar),
    /// `- key: value` or `- key:`; the first entry of an inline map.
    Entry { key: String, value: Option<Scalar> },
}

/// Classified content of one logical line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `@agent id version`, `@end`
    Directive { name: String, args: Vec<String> },
    /// `key: value` or `key:` opening a nested block.
    Entry { key: String, value: Option<Scalar> },
    /// `step <id>: [kind] [provider]`
    StepHeader {
        id: String,
        kind: Option<String>,
        provider: Option<String>,
    },
    /// `- ...`; `content_indent` is the 0-based column where the body starts.
    Item { content_indent: usize, body: ItemBody },
    /// A line that is none of the above.
    Text(String),
}

/// One significant source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based line number.
    pub number: usize,
    /// Count of leading spaces.
    pub indent: usize,
    pub token: Token,
    /// Raw source text, for diagnostic context.
    pub text: String,
}

impl Line {
    /// 1-based column of the first significant character.
    pub fn column(&self) -> usize {
        self.indent + 1
    }
}

/// Character cursor over a single line.
struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.pos += 1;
        ch
    }

    fn skip_spaces(&mut self) {
        while matches!(self.current(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn rest(&self) -> String {
        self.chars[self.pos.min(self.chars.len())..].iter().collect()
    }

    /// Read a quoted string starting at the opening quote.
    ///
    /// Returns `None` when the line ends before the closing quote.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.advance()?;
        let mut s = String::new();

        while let Some(ch) = self.current() {
            if ch == quote {
                self.advance();
                return Some(s);
            } else if ch == '\\' {
                self.advance();
                match self.current() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some(c @ ('"' | '\'' | '\\')) => s.push(c),
                    Some(c) => {
                        s.push('\\');
                        s.push(c);
                    }
                    None => {
                        s.push('\\');
                        break;
                    }
                }
                self.advance();
            } else {
                s.push(ch);
                self.advance();
            }
        }

        None
    }

    /// Read a key made of identifier characters.
    fn read_key(&mut self) -> String {
        let mut key = String::new();
        while let Some(ch) = self.current() {
            if is_key_char(ch) {
                key.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        key
    }
}

fn is_key_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

/// Strip a trailing `#` comment, ignoring `#` inside quotes.
///
/// A `#` only starts a comment at the start of the text or after
/// whitespace, so URLs and colors (`#fff` after a space excepted) survive.
/// A quote only opens a quoted run at a token boundary, so apostrophes in
/// words (`it's`) do not swallow the comment.
pub fn strip_comment(text: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
        } else if (ch == '"' || ch == '\'')
            && prev.is_none_or(|p| p.is_whitespace() || matches!(p, '=' | '(' | '!' | '[' | ','))
        {
            quote = Some(ch);
        } else if ch == '#' && prev.is_none_or(char::is_whitespace) {
            return text[..idx].trim_end();
        }
        prev = Some(ch);
    }

    text.trim_end()
}

/// Lexer for agent source text.
#[derive(Debug)]
pub struct Lexer<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines().collect(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Tokenize the whole source.
    pub fn tokenize(mut self) -> (Vec<Line>, Vec<Diagnostic>) {
        let mut out = Vec::new();
        while self.pos < self.lines.len() {
            let number = self.pos + 1;
            let raw = self.lines[self.pos];
            self.pos += 1;
            if let Some(line) = self.lex_line(number, raw) {
                out.push(line);
            }
        }
        (out, self.diagnostics)
    }

    fn lex_line(&mut self, number: usize, raw: &str) -> Option<Line> {
        let raw = raw.trim_end_matches('\r');
        let content = raw.trim_start();
        if content.is_empty() || content.starts_with('#') {
            return None;
        }

        let leading = &raw[..raw.len() - content.len()];
        if leading.contains('\t') {
            self.diagnostics.push(
                Diagnostic::error(number, leading.find('\t').unwrap_or(0) + 1, "Tab character used for indentation")
                    .with_context(raw)
                    .with_suggestion("Indent with spaces; tabs make nesting ambiguous"),
            );
        }
        let indent = leading.chars().count();

        let token = if let Some(directive) = content.strip_prefix('@') {
            let mut words = strip_comment(directive).split_whitespace();
            let name = words.next().unwrap_or_default().to_string();
            Token::Directive {
                name,
                args: words.map(str::to_string).collect(),
            }
        } else if content == "-" || content.starts_with("- ") || content.starts_with("-\t") {
            let body_text = content[1..].trim_start();
            let content_indent = indent + (content.chars().count() - body_text.chars().count());
            let body = if strip_comment(body_text).is_empty() {
                ItemBody::Empty
            } else {
                match self.lex_entry(number, raw, body_text, content_indent) {
                    Some((key, value)) => ItemBody::Entry { key, value },
                    None => ItemBody::Scalar(self.lex_value(number, raw, body_text, content_indent, content_indent)),
                }
            };
            Token::Item {
                content_indent,
                body,
            }
        } else if let Some(header) = self.lex_step_header(number, raw, content, indent) {
            header
        } else if let Some((key, value)) = self.lex_entry(number, raw, content, indent) {
            Token::Entry { key, value }
        } else {
            Token::Text(strip_comment(content).to_string())
        };

        Some(Line {
            number,
            indent,
            token,
            text: raw.to_string(),
        })
    }

    /// `step <id>: [kind] [provider]`
    fn lex_step_header(&mut self, number: usize, raw: &str, content: &str, indent: usize) -> Option<Token> {
        let rest = content.strip_prefix("step")?;
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        let mut cursor = Cursor::new(rest);
        cursor.skip_spaces();
        let id = cursor.read_key();
        cursor.skip_spaces();
        if id.is_empty() || cursor.current() != Some(':') {
            return None;
        }
        cursor.advance();

        let tail = cursor.rest();
        let mut words = strip_comment(&tail).split_whitespace();
        let kind = words.next().map(str::to_string);
        let provider = words.next().map(str::to_string);
        let extra: Vec<&str> = words.collect();
        if !extra.is_empty() {
            self.diagnostics.push(
                Diagnostic::warning(number, indent + 1, format!("Ignoring extra text after step header: '{}'", extra.join(" ")))
                    .with_context(raw)
                    .with_suggestion("Use the form `step <id>: <kind> [provider]` and put other fields on indented lines"),
            );
        }
        Some(Token::StepHeader { id, kind, provider })
    }

    /// `key: value` / `key:`. Returns `None` when the text is not an entry.
    fn lex_entry(&mut self, number: usize, raw: &str, content: &str, indent: usize) -> Option<(String, Option<Scalar>)> {
        let mut cursor = Cursor::new(content);
        let key = if matches!(cursor.current(), Some('"') | Some('\'')) {
            cursor.read_string()?
        } else {
            cursor.read_key()
        };
        if key.is_empty() {
            return None;
        }
        cursor.skip_spaces();
        if cursor.current() != Some(':') {
            return None;
        }
        // `key:value` without a space is not an entry (think `env:NAME`).
        if !matches!(cursor.peek(), None | Some(' ') | Some('\t')) {
            return None;
        }
        cursor.advance();
        let value_start = cursor.pos;
        let tail = cursor.rest();
        let leading = tail.len() - tail.trim_start().len();
        let value_text = tail.trim_start();

        if strip_comment(value_text).is_empty() {
            return Some((key, None));
        }

        let column = indent + value_start + leading;
        let value = self.lex_value(number, raw, value_text, column, indent);
        Some((key, Some(value)))
    }

    /// Scan a value starting at `text`. `column` is the 0-based column of
    /// `text`; `owner_indent` is the indentation block-scalar bodies must
    /// exceed.
    fn lex_value(&mut self, number: usize, raw: &str, text: &str, column: usize, owner_indent: usize) -> Scalar {
        let stripped = strip_comment(text);
        if stripped == "|" || stripped == "|-" {
            let body = self.read_block(owner_indent, stripped == "|");
            return Scalar::Block(body);
        }

        match text.chars().next() {
            Some('"') | Some('\'') => self.lex_quoted(number, raw, text, column),
            Some('[') => self.lex_flow_list(number, raw, text, column),
            _ => Scalar::Plain(stripped.trim().to_string()),
        }
    }

    fn lex_quoted(&mut self, number: usize, raw: &str, text: &str, column: usize) -> Scalar {
        let mut cursor = Cursor::new(text);
        let quote = cursor.current().unwrap_or('"');
        match cursor.read_string() {
            Some(s) => {
                let trailing = cursor.rest();
                let trailing = strip_comment(trailing.trim_start());
                if !trailing.is_empty() {
                    self.diagnostics.push(
                        Diagnostic::warning(number, column + 1, format!("Ignoring text after closing quote: '{}'", trailing))
                            .with_context(raw)
                            .with_suggestion("Quote the whole value, or move the extra text into the string"),
                    );
                }
                Scalar::Quoted(s)
            }
            None => {
                self.diagnostics.push(
                    Diagnostic::error(number, column + 1, "Unterminated string")
                        .with_context(raw)
                        .with_suggestion(format!("Close the string with a matching {} before the end of the line", quote)),
                );
                Scalar::Quoted(text[quote.len_utf8()..].to_string())
            }
        }
    }

    fn lex_flow_list(&mut self, number: usize, raw: &str, text: &str, column: usize) -> Scalar {
        let mut cursor = Cursor::new(text);
        cursor.advance(); // [
        let mut items = Vec::new();

        loop {
            cursor.skip_spaces();
            match cursor.current() {
                Some(']') => {
                    cursor.advance();
                    return Scalar::List(items);
                }
                Some(',') => {
                    cursor.advance();
                }
                Some('"') | Some('\'') => match cursor.read_string() {
                    Some(s) => items.push(Scalar::Quoted(s)),
                    None => {
                        self.diagnostics.push(
                            Diagnostic::error(number, column + 1, "Unterminated string in list")
                                .with_context(raw)
                                .with_suggestion("Close the quoted list element"),
                        );
                        return Scalar::List(items);
                    }
                },
                Some(_) => {
                    let mut word = String::new();
                    while let Some(ch) = cursor.current() {
                        if ch == ',' || ch == ']' {
                            break;
                        }
                        word.push(ch);
                        cursor.advance();
                    }
                    items.push(Scalar::Plain(word.trim().to_string()));
                }
                None => {
                    self.diagnostics.push(
                        Diagnostic::error(number, column + 1, "Unterminated list")
                            .with_context(raw)
                            .with_suggestion("Close the list with ']'"),
                    );
                    return Scalar::List(items);
                }
            }
        }
    }

    /// Collect the body of a block scalar: every following line that is
    /// blank or indented deeper than `owner_indent`.
    fn read_block(&mut self, owner_indent: usize, keep_newline: bool) -> String {
        let mut body: Vec<&str> = Vec::new();
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos].trim_end_matches('\r');
            if !line.trim().is_empty() && leading_width(line) <= owner_indent {
                break;
            }
            body.push(line);
            self.pos += 1;
        }

        while body.last().is_some_and(|l| l.trim().is_empty()) {
            body.pop();
        }

        let dedent = body
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| leading_width(l))
            .min()
            .unwrap_or(0);

        let mut text = body
            .iter()
            .map(|l| strip_indent(l, dedent))
            .collect::<Vec<_>>()
            .join("\n");
        if keep_newline && !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

/// Leading whitespace, counted in chars.
fn leading_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Drop the first `width` chars of `line`.
fn strip_indent(line: &str, width: usize) -> &str {
    match line.char_indices().nth(width) {
        Some((idx, _)) => &line[idx..],
        None => "",
    }
}
