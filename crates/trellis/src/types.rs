//! Type synonym resolution.
//!
//! The catalog reports types in its own canonical spelling (`character
//! varying`, `timestamp without time zone`), while code declares whatever
//! spelling was convenient (`varchar`, `timestamp`). Column comparison must
//! go through this registry, never raw string equality.
//!
//! The registry is an explicit, immutable value constructed once at startup
//! and passed by reference into the introspector and diff engine. There is
//! deliberately no process-wide singleton and no mutation API.

use std::collections::{HashMap, HashSet};

/// How a column type transition classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAlteration {
    /// Same type under normalization; nothing to do.
    Unchanged,
    /// Expressible as `ALTER COLUMN ... TYPE` without data loss.
    Safe,
    /// No safe automatic resolution; the engine declines to auto-apply.
    Incompatible,
}

/// Immutable registry mapping reported type spellings to canonical forms,
/// plus the enumerated set of safely alterable type transitions.
#[derive(Debug)]
pub struct TypeRegistry {
    synonyms: HashMap<&'static str, &'static str>,
    widenings: HashSet<(&'static str, &'static str)>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let synonyms = HashMap::from([
            ("varchar", "character varying"),
            ("char", "character"),
            ("bpchar", "character"),
            ("int", "integer"),
            ("int4", "integer"),
            ("int2", "smallint"),
            ("int8", "bigint"),
            ("serial", "integer"),
            ("serial4", "integer"),
            ("serial2", "smallint"),
            ("smallserial", "smallint"),
            ("serial8", "bigint"),
            ("bigserial", "bigint"),
            ("bool", "boolean"),
            ("float4", "real"),
            ("float", "double precision"),
            ("float8", "double precision"),
            ("decimal", "numeric"),
            ("timestamptz", "timestamp with time zone"),
            ("timestamp", "timestamp without time zone"),
            ("timetz", "time with time zone"),
            ("time", "time without time zone"),
        ]);

        // The safe alteration set, by canonical base type. Everything outside
        // this set (plus same-base modifier changes) is Incompatible.
        let widenings = HashSet::from([
            ("smallint", "integer"),
            ("smallint", "bigint"),
            ("integer", "bigint"),
            ("real", "double precision"),
            ("character", "character varying"),
            ("character", "text"),
            ("character varying", "text"),
        ]);

        Self { synonyms, widenings }
    }

    /// Resolve a declared or reported spelling to its canonical form.
    ///
    /// Length/precision modifiers and array suffixes survive the mapping:
    /// `varchar(50)` becomes `character varying(50)`.
    pub fn canonical(&self, declared: &str) -> String {
        let (body, array) = split_array_suffix(declared.trim());
        let (base, modifier) = split_modifier(body);
        let mapped = match self.synonyms.get(base.as_str()) {
            Some(canonical) => *canonical,
            None => base.as_str(),
        };
        let mut out = mapped.to_string();
        if let Some(modifier) = modifier {
            out.push_str(&modifier);
        }
        if array {
            out.push_str("[]");
        }
        out
    }

    /// Whether two spellings name the same underlying type.
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        self.canonical(a) == self.canonical(b)
    }

    /// Classify changing a column from one declared type to another.
    pub fn alteration(&self, from: &str, to: &str) -> TypeAlteration {
        let from = self.canonical(from);
        let to = self.canonical(to);
        if from == to {
            return TypeAlteration::Unchanged;
        }

        let (from_body, from_array) = split_array_suffix(&from);
        let (to_body, to_array) = split_array_suffix(&to);
        if from_array != to_array {
            return TypeAlteration::Incompatible;
        }

        let (from_base, _) = split_modifier(from_body);
        let (to_base, _) = split_modifier(to_body);
        if from_base == to_base {
            // Same base, different length/precision modifier.
            return TypeAlteration::Safe;
        }
        let widened = self
            .widenings
            .iter()
            .any(|&(from, to)| from == from_base && to == to_base);
        if widened {
            TypeAlteration::Safe
        } else {
            TypeAlteration::Incompatible
        }
    }

    /// Single-word synonym lookup used when canonicalizing SQL text
    /// word-by-word. Only spellings that are unambiguous as lone words are
    /// mapped (`timestamp` is not, since it also prefixes the multi-word
    /// canonical forms).
    pub(crate) fn word_synonym(&self, word: &str) -> Option<&'static str> {
        match word {
            "timestamp" | "time" | "char" => None,
            other => self.synonyms.get(other).copied(),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn split_array_suffix(text: &str) -> (&str, bool) {
    match text.strip_suffix("[]") {
        Some(body) => (body.trim_end(), true),
        None => (text, false),
    }
}

/// Split `varchar(50)` into base and modifier (modifier keeps its parens).
fn split_modifier(text: &str) -> (String, Option<String>) {
    match text.find('(') {
        Some(pos) => (
            collapse(&text[..pos]),
            Some(text[pos..].split_whitespace().collect()),
        ),
        None => (collapse(text), None),
    }
}

/// Lower-case and collapse internal whitespace.
fn collapse(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}
