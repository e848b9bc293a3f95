//! URI templates for dynamic resources.
//!
//! An RFC 6570 subset: expressions are `{[op]var,var,...}` with operators
//! `+ # . / ? &`, everything outside braces is literal. Templates expand a
//! binding map to a concrete URI and match a concrete URI back to bindings
//! through a regex compiled once at construction.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error::{McpError, Result};

/// Everything outside the RFC 3986 unreserved set gets percent-encoded
/// during simple-operator expansion.
const PATH_UNSAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Expression operator controlling prefix, encoding and match class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `{var}` — percent-encoded, no prefix
    Simple,
    /// `{+var}` — reserved characters preserved
    Reserved,
    /// `{#var}` — fragment, prefixed with `#`
    Fragment,
    /// `{.var}` — label, prefixed with `.`
    Label,
    /// `{/var}` — path segment, prefixed with `/`
    Path,
    /// `{?var}` — query, prefixed with `?`
    Query,
    /// `{&var}` — query continuation, prefixed with `&`
    Continuation,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Reserved),
            '#' => Some(Operator::Fragment),
            '.' => Some(Operator::Label),
            '/' => Some(Operator::Path),
            '?' => Some(Operator::Query),
            '&' => Some(Operator::Continuation),
            _ => None,
        }
    }

    /// Literal prefix the expansion carries
    fn prefix(&self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved => "",
            Operator::Fragment => "#",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::Query => "?",
            Operator::Continuation => "&",
        }
    }

    /// Capture class used when matching a URI against the template
    fn capture(&self) -> &'static str {
        match self {
            Operator::Query | Operator::Continuation => "([^&]+)",
            Operator::Reserved | Operator::Fragment => "([^/]+(?:/[^/]+)*)",
            _ => "([^/]+)",
        }
    }
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Expression(Expression),
}

#[derive(Debug, Clone)]
struct Expression {
    operator: Operator,
    names: Vec<String>,
}

/// A compiled URI template
#[derive(Debug, Clone)]
pub struct UriTemplate {
    pattern: String,
    parts: Vec<Part>,
    variables: Vec<String>,
    regex: Regex,
}

impl UriTemplate {
    /// Parse and compile a template pattern.
    ///
    /// Fails with [`McpError::InvalidTemplate`] on an unterminated `{`, an
    /// unknown operator, or an empty expression.
    pub fn new(pattern: &str) -> Result<Self> {
        let parts = parse_parts(pattern)?;
        let regex = compile_regex(pattern, &parts)?;

        let variables = parts
            .iter()
            .filter_map(|p| match p {
                Part::Expression(e) => Some(e.names.iter().cloned()),
                Part::Literal(_) => None,
            })
            .flatten()
            .collect();

        Ok(Self {
            pattern: pattern.to_string(),
            parts,
            variables,
            regex,
        })
    }

    /// The original template pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Variable names in order of appearance
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Expand the template with the given bindings.
    ///
    /// Array values join their elements with `,`; other values use their
    /// canonical string form. Expressions with no bound variable are erased,
    /// so partial binding maps produce shorter URIs rather than errors.
    pub fn expand(&self, bindings: &HashMap<String, serde_json::Value>) -> String {
        let mut out = String::new();

        for part in &self.parts {
            match part {
                Part::Literal(lit) => out.push_str(lit),
                Part::Expression(expr) => {
                    let values: Vec<String> = expr
                        .names
                        .iter()
                        .filter_map(|name| bindings.get(name))
                        .filter_map(value_to_string)
                        .collect();

                    if values.is_empty() {
                        continue;
                    }

                    out.push_str(expr.operator.prefix());
                    let joined = values.join(",");
                    if expr.operator == Operator::Simple {
                        out.push_str(&utf8_percent_encode(&joined, PATH_UNSAFE).to_string());
                    } else {
                        out.push_str(&joined);
                    }
                }
            }
        }

        out
    }

    /// Match a concrete URI against the template.
    ///
    /// Returns the captured bindings, or `None` if the URI does not fit.
    /// A multi-name expression shares one capture group: the capture is
    /// split on `,` and assigned positionally when the piece count lines
    /// up, otherwise every name receives the raw capture.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(uri)?;

        let mut bindings = HashMap::new();
        let mut group = 0;

        for part in &self.parts {
            let expr = match part {
                Part::Expression(e) => e,
                Part::Literal(_) => continue,
            };
            group += 1;

            let captured = captures.get(group)?.as_str();
            if expr.names.len() == 1 {
                bindings.insert(expr.names[0].clone(), captured.to_string());
                continue;
            }

            let pieces: Vec<&str> = captured.split(',').collect();
            if pieces.len() == expr.names.len() {
                for (name, piece) in expr.names.iter().zip(pieces) {
                    bindings.insert(name.clone(), piece.to_string());
                }
            } else {
                for name in &expr.names {
                    bindings.insert(name.clone(), captured.to_string());
                }
            }
        }

        Some(bindings)
    }

    /// Whether the URI fits the template
    pub fn matches(&self, uri: &str) -> bool {
        self.regex.is_match(uri)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Canonical string form of a binding value. `Null` counts as unbound.
fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

fn parse_parts(pattern: &str) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            literal.push(c);
            continue;
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }

        let mut body = String::new();
        let mut terminated = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                terminated = true;
                break;
            }
            if inner == '{' {
                return Err(McpError::invalid_template(pattern, "nested '{'"));
            }
            body.push(inner);
        }

        if !terminated {
            return Err(McpError::invalid_template(pattern, "unterminated '{'"));
        }

        parts.push(Part::Expression(parse_expression(pattern, &body)?));
    }

    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }

    Ok(parts)
}

fn parse_expression(pattern: &str, body: &str) -> Result<Expression> {
    if body.is_empty() {
        return Err(McpError::invalid_template(pattern, "empty expression"));
    }

    let mut rest = body;
    let first = body.chars().next().unwrap_or_default();
    let operator = if let Some(op) = Operator::from_char(first) {
        rest = &body[first.len_utf8()..];
        op
    } else if !first.is_alphanumeric() && first != '_' {
        return Err(McpError::invalid_template(
            pattern,
            format!("invalid operator '{}'", first),
        ));
    } else {
        Operator::Simple
    };

    if rest.is_empty() {
        return Err(McpError::invalid_template(pattern, "empty variable list"));
    }

    let mut names = Vec::new();
    for name in rest.split(',') {
        if name.is_empty() {
            return Err(McpError::invalid_template(pattern, "empty variable name"));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '%')
        {
            return Err(McpError::invalid_template(
                pattern,
                format!("invalid variable name '{}'", name),
            ));
        }
        names.push(name.to_string());
    }

    Ok(Expression { operator, names })
}

fn compile_regex(pattern: &str, parts: &[Part]) -> Result<Regex> {
    let mut source = String::from("^");

    for part in parts {
        match part {
            Part::Literal(lit) => source.push_str(&regex::escape(lit)),
            Part::Expression(expr) => {
                source.push_str(&regex::escape(expr.operator.prefix()));
                source.push_str(expr.operator.capture());
            }
        }
    }

    source.push('$');

    Regex::new(&source)
        .map_err(|e| McpError::invalid_template(pattern, format!("regex compilation: {}", e)))
}
