//! Strings with `${pointer}` parameters resolved on every use.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;

use crate::data::ReadOp;
use crate::error::{Error, Result};
use crate::instruction::Frame;
use crate::model::Model;
use crate::pointer::Pointer;
use crate::tree::NodeId;

static IN_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\$p?[1-9]?\{)([^${}]+)(\})").expect("in-string parameter regex"));
static COMPOUND_COPY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s*\{\s*"copy"\s*:\s*")([^${}]+)("\s*\})"#).expect("compound copy regex")
});
static READ_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(length|copy|pop|get|parse):(.*)").expect("read operation regex"));

const MAX_ROUNDS: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterizedString {
    text: String,
    compound: bool,
    has_params: bool,
}

impl ParameterizedString {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_mode(text.into(), false)
    }

    /// Also resolves `{"copy": "<pointer>"}` objects, for compound values.
    pub fn compound(text: impl Into<String>) -> Self {
        Self::with_mode(text.into(), true)
    }

    fn with_mode(text: String, compound: bool) -> Self {
        let has_params = IN_STRING.is_match(&text) || (compound && COMPOUND_COPY.is_match(&text));
        Self {
            text,
            compound,
            has_params,
        }
    }

    pub fn has_dynamic_params(&self) -> bool {
        self.has_params
    }

    pub fn unresolved(&self) -> &str {
        &self.text
    }

    /// Substitute parameters until none are left. `owner` scopes the pointers.
    pub fn resolve(&self, model: &Model, frame: &Frame, owner: NodeId, owner_path: &str) -> Result<String> {
        if !self.has_params {
            return Ok(self.text.clone());
        }
        let resolver = Resolver {
            model,
            frame,
            owner,
            owner_path,
        };
        let resolved = resolver.substitute(&self.text, &IN_STRING, true)?;
        if self.compound {
            resolver.substitute(&resolved, &COMPOUND_COPY, false)
        } else {
            Ok(resolved)
        }
    }
}

struct Resolver<'a> {
    model: &'a Model,
    frame: &'a Frame,
    owner: NodeId,
    owner_path: &'a str,
}

impl Resolver<'_> {
    fn substitute(&self, text: &str, regex: &Regex, in_string: bool) -> Result<String> {
        let mut current = text.to_owned();
        for _ in 0..MAX_ROUNDS {
            if !regex.is_match(&current) {
                return Ok(current);
            }
            let mut next = String::with_capacity(current.len());
            let mut last = 0;
            for captures in regex.captures_iter(&current) {
                let Some(whole) = captures.get(0) else {
                    continue;
                };
                next.push_str(&current[last..whole.start()]);
                next.push_str(&self.render(&captures, in_string)?);
                last = whole.end();
            }
            next.push_str(&current[last..]);
            current = next;
        }
        Err(Error::fatal_at(
            self.owner_path,
            format!("Parameterized string is too deeply nested: \"{text}\""),
        ))
    }

    fn render(&self, captures: &Captures<'_>, in_string: bool) -> Result<String> {
        let marker = captures.get(1).map_or("", |m| m.as_str());
        let content = captures.get(2).map_or("", |m| m.as_str());
        let (operation, path) = match READ_OP.captures(content) {
            Some(op) => (
                op.get(1).and_then(|m| ReadOp::from_prefix(m.as_str())).unwrap_or_default(),
                op.get(2).map_or("", |m| m.as_str()),
            ),
            None => (ReadOp::Get, content),
        };
        let pointer = Pointer::transient(self.owner, self.owner_path, path);
        let value = pointer.read_value(self.model, self.frame, operation)?;
        if in_string {
            if let Value::String(text) = value {
                return Ok(text);
            }
            if let Some(indent) = pretty_indent(marker) {
                return Ok(to_string_indented(&value, indent));
            }
        }
        Ok(value.to_string())
    }
}

/// `$p{` pretty-prints with two spaces, `$pN{` with N.
fn pretty_indent(marker: &str) -> Option<usize> {
    let rest = marker.strip_prefix("$p")?;
    match rest.as_bytes().first() {
        Some(digit @ b'1'..=b'9') => Some(usize::from(digit - b'0')),
        _ => Some(2),
    }
}

fn to_string_indented(value: &Value, indent: usize) -> String {
    let spaces = vec![b' '; indent];
    let formatter = serde_json::ser::PrettyFormatter::with_indent(&spaces);
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(out).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}
