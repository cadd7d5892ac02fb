//! Response protocol: executable snippets and final-answer directives.
//!
//! The protocol is a line-oriented convention over free-form model text:
//!
//! - a fenced block opened by ```` ```repl ```` and a newline carries a snippet;
//! - `FINAL(<text>)` carries a literal answer;
//! - `FINAL_VAR(<name>)` names a binding that holds the answer.
//!
//! Parsing never fails. Malformed replies degrade to explicit default values.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Keyword tagging an executable fenced block.
pub const SNIPPET_MARKER: &str = "repl";
/// Returned when `FINAL_VAR` names a binding that does not exist.
pub const NO_VARIABLE: &str = "No variable found";
/// Returned when a reply carries no usable final-answer directive.
pub const NO_FINAL_ANSWER: &str = "No final answer found";

const LITERAL_OPEN: &str = "FINAL(";
const VARIABLE_OPEN: &str = "FINAL_VAR(";

static SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```repl\r?\n(.*?)\r?\n```").expect("snippet pattern should be valid")
});

/// A final-answer directive found in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FinalDirective {
    /// `FINAL(<text>)`.
    Literal(String),
    /// `FINAL_VAR(<name>)`.
    Variable(String),
    /// The reply mentions a final answer but carries no parsable directive.
    Malformed,
}

impl FinalDirective {
    /// Resolve the directive to answer text, looking up named bindings.
    pub fn resolve<F>(&self, lookup: F) -> String
    where
        F: FnOnce(&str) -> Option<String>,
    {
        match self {
            Self::Literal(text) => text.clone(),
            Self::Variable(name) => lookup(name).unwrap_or_else(|| NO_VARIABLE.to_string()),
            Self::Malformed => NO_FINAL_ANSWER.to_string(),
        }
    }
}

/// Everything the parser extracts from one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedReply<'a> {
    pub snippet: Option<&'a str>,
    pub directive: Option<FinalDirective>,
}

pub fn parse_reply(reply: &str) -> ParsedReply<'_> {
    ParsedReply {
        snippet: extract_snippet(reply),
        directive: detect_final(reply),
    }
}

/// Body of the first ```` ```repl ```` block, without its fences.
pub fn extract_snippet(reply: &str) -> Option<&str> {
    SNIPPET_RE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str())
}

/// Detect a final-answer directive.
///
/// `FINAL(...)` wins over `FINAL_VAR(...)`. A reply that only mentions the
/// keyword (any case) is still a terminal signal and yields
/// [`FinalDirective::Malformed`].
pub fn detect_final(reply: &str) -> Option<FinalDirective> {
    if let Some(payload) = directive_payload(reply, LITERAL_OPEN) {
        return Some(FinalDirective::Literal(payload.trim().to_string()));
    }
    if let Some(payload) = directive_payload(reply, VARIABLE_OPEN) {
        let name = strip_quotes(payload.trim());
        if !name.is_empty() {
            return Some(FinalDirective::Variable(name.to_string()));
        }
        return Some(FinalDirective::Malformed);
    }
    if reply.to_ascii_uppercase().contains("FINAL") {
        return Some(FinalDirective::Malformed);
    }
    None
}

/// Answer text for a reply; [`NO_FINAL_ANSWER`] when no directive is present.
pub fn extract_final<F>(reply: &str, lookup: F) -> String
where
    F: FnOnce(&str) -> Option<String>,
{
    match detect_final(reply) {
        Some(directive) => directive.resolve(lookup),
        None => NO_FINAL_ANSWER.to_string(),
    }
}

/// Text between `open` and its matching close parenthesis.
///
/// Nested parentheses stay balanced. When the payload is never closed, it
/// runs to the last `)` in the reply.
fn directive_payload<'a>(reply: &'a str, open: &str) -> Option<&'a str> {
    let start = reply.find(open)? + open.len();
    let rest = &reply[start..];
    let mut nesting = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '(' => nesting += 1,
            ')' if nesting == 0 => return Some(&rest[..idx]),
            ')' => nesting -= 1,
            _ => {}
        }
    }
    rest.rfind(')').map(|idx| &rest[..idx])
}

fn strip_quotes(name: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = name
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    name
}
