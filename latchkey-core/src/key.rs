//! Turns key templates into concrete lock keys.
//!
//! A template is a small expression over the call arguments:
//!
//! ```text
//! 'literal'            quoted literal ('' escapes a quote)
//! #p0 / #a0            positional argument
//! #name                argument by parameter name
//! #p0.field  #p1[2]    navigation into objects and arrays
//! 'order:' + #p0.id    concatenation
//! ```
//!
//! Evaluation is a pure function of the template, the arguments and the
//! method descriptor.

use serde_json::Value;

use crate::error::KeyResolutionError;
use crate::types::MethodDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Accessor {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Literal(String),
    Reference { root: Root, path: Vec<Accessor> },
}

/// Resolves key templates against call arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyEvaluator;

impl KeyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve each template into exactly one key, preserving order.
    pub fn evaluate(
        &self,
        templates: &[String],
        args: &[Value],
        method: &MethodDescriptor,
    ) -> Result<Vec<String>, KeyResolutionError> {
        templates
            .iter()
            .map(|template| self.evaluate_one(template, args, method))
            .collect()
    }

    pub fn evaluate_one(
        &self,
        template: &str,
        args: &[Value],
        method: &MethodDescriptor,
    ) -> Result<String, KeyResolutionError> {
        let terms = Parser::new(template).parse()?;
        let mut key = String::new();
        for term in &terms {
            match term {
                Term::Literal(text) => key.push_str(text),
                Term::Reference { root, path } => {
                    let value = lookup(template, root, path, args, method)?;
                    key.push_str(&to_key_text(template, value)?);
                }
            }
        }
        Ok(key)
    }
}

fn lookup<'a>(
    template: &str,
    root: &Root,
    path: &[Accessor],
    args: &'a [Value],
    method: &MethodDescriptor,
) -> Result<&'a Value, KeyResolutionError> {
    let index = match root {
        Root::Index(index) => *index,
        Root::Name(name) => method.param_index(name).ok_or_else(|| {
            KeyResolutionError::UnknownParameter {
                template: template.to_string(),
                name: name.clone(),
            }
        })?,
    };
    let mut value = args
        .get(index)
        .ok_or(KeyResolutionError::ArgumentOutOfRange {
            template: template.to_string(),
            index,
            len: args.len(),
        })?;

    let mut walked = match root {
        Root::Index(i) => format!("#p{i}"),
        Root::Name(name) => format!("#{name}"),
    };
    for accessor in path {
        let next = match accessor {
            Accessor::Field(field) => {
                walked.push('.');
                walked.push_str(field);
                value.get(field.as_str())
            }
            Accessor::Index(i) => {
                walked.push_str(&format!("[{i}]"));
                value.get(*i)
            }
        };
        value = next.ok_or_else(|| KeyResolutionError::MissingValue {
            template: template.to_string(),
            path: walked.clone(),
        })?;
    }
    Ok(value)
}

fn to_key_text(template: &str, value: &Value) -> Result<String, KeyResolutionError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(KeyResolutionError::Null {
            template: template.to_string(),
        }),
        Value::Array(_) => Err(KeyResolutionError::NotAString {
            template: template.to_string(),
            kind: "array",
        }),
        Value::Object(_) => Err(KeyResolutionError::NotAString {
            template: template.to_string(),
            kind: "object",
        }),
    }
}

struct Parser<'t> {
    template: &'t str,
    chars: Vec<char>,
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(template: &'t str) -> Self {
        Self {
            template,
            chars: template.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Term>, KeyResolutionError> {
        let mut terms = vec![self.term()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(terms),
                Some('+') => {
                    self.pos += 1;
                    terms.push(self.term()?);
                }
                Some(c) => return Err(self.error(format!("unexpected `{c}` at {}", self.pos))),
            }
        }
    }

    fn term(&mut self) -> Result<Term, KeyResolutionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') => self.literal(),
            Some('#') => self.reference(),
            Some(c) => Err(self.error(format!(
                "expected a quoted literal or #reference, found `{c}`"
            ))),
            None => Err(self.error("expression is empty or ends with `+`".into())),
        }
    }

    fn literal(&mut self) -> Result<Term, KeyResolutionError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.pos += 1;
                    text.push('\'');
                }
                Some('\'') => return Ok(Term::Literal(text)),
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated string literal".into())),
            }
        }
    }

    fn reference(&mut self) -> Result<Term, KeyResolutionError> {
        self.pos += 1;
        let ident = self.ident();
        if ident.is_empty() {
            return Err(self.error("`#` must be followed by an argument reference".into()));
        }
        let root = positional(&ident)
            .map(Root::Index)
            .unwrap_or(Root::Name(ident));
        if root == Root::Name("root".into()) || root == Root::Name("this".into()) {
            return Err(self.error("only argument references are supported".into()));
        }

        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let field = self.ident();
                    if field.is_empty() {
                        return Err(self.error("expected a field name after `.`".into()));
                    }
                    path.push(Accessor::Field(field));
                }
                Some('[') => {
                    self.pos += 1;
                    let digits = self.take_while(|c| c.is_ascii_digit());
                    if self.bump() != Some(']') {
                        return Err(self.error("expected `]`".into()));
                    }
                    let index = digits
                        .parse()
                        .map_err(|_| self.error(format!("invalid index `{digits}`")))?;
                    path.push(Accessor::Index(index));
                }
                _ => return Ok(Term::Reference { root, path }),
            }
        }
    }

    fn ident(&mut self) -> String {
        self.take_while(|c| c.is_alphanumeric() || c == '_')
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: String) -> KeyResolutionError {
        KeyResolutionError::Syntax {
            template: self.template.to_string(),
            message,
        }
    }
}

/// `p3` / `a3` -> 3
fn positional(ident: &str) -> Option<usize> {
    let digits = ident.strip_prefix('p').or_else(|| ident.strip_prefix('a'))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
