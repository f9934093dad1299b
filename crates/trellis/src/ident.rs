//! Schema-qualified object names.

use crate::Result;
use crate::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use trellis_sql::quote_ident;

/// A schema-qualified name addressing one database object.
///
/// Comparison and hashing are case-insensitive, matching the server's folding
/// of unquoted identifiers. Parsing a bare `name` applies the default schema,
/// so every `ObjectName` carries an explicit schema; rendering always
/// produces `schema.name`, quoting each part only when the spelling requires
/// it.
#[derive(Debug, Clone)]
pub struct ObjectName {
    schema: String,
    name: String,
}

impl ObjectName {
    pub const DEFAULT_SCHEMA: &'static str = "public";

    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { schema: schema.into(), name: name.into() }
    }

    /// A name in the default schema.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_SCHEMA, name)
    }

    /// Parse `"schema.name"` or `"name"` (default schema applied).
    ///
    /// Fails on empty input or a dangling dot; the error is
    /// [`Error::MalformedDefinition`] since this only happens when a
    /// definition was authored wrong.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Ok(Self::new(unquote(schema), unquote(name)))
            }
            Some(_) => Err(Error::MalformedDefinition(format!(
                "invalid object name: {text:?}"
            ))),
            None if text.is_empty() => Err(Error::MalformedDefinition(
                "object name cannot be empty".into(),
            )),
            None => Ok(Self::public(unquote(text))),
        }
    }

    /// Lossy variant of [`ObjectName::parse`] for builder entry points:
    /// anything without a dot is a name in the default schema.
    pub fn from_qualified(text: &str) -> Self {
        let text = text.trim();
        match text.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Self::new(unquote(schema), unquote(name))
            }
            _ => Self::public(unquote(text)),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rendered `schema.name` form.
    pub fn qualified(&self) -> String {
        self.to_string()
    }
}

/// Strip one level of double-quoting from an identifier part.
fn unquote(part: &str) -> String {
    let part = part.trim();
    if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
        part[1..part.len() - 1].replace("\"\"", "\"")
    } else {
        part.to_string()
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for ObjectName {}

impl Hash for ObjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.schema.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0);
        for b in self.name.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}
