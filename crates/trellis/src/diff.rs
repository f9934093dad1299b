//! Structural comparison of desired and existing schema objects.
//!
//! The functions here are pure: snapshots in, classification out. Nothing is
//! mutated, nothing errors — an unresolvable difference is the [`Invalid`]
//! *value*, and only the planner decides whether that is fatal.
//!
//! [`Invalid`]: SchemaPatchDifference::Invalid

use crate::schema::{Column, ForeignKey, Function, Index, Table};
use crate::types::{TypeAlteration, TypeRegistry};
use std::collections::HashSet;
use std::fmt;

/// How a desired object relates to its existing counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPatchDifference {
    /// Existing matches desired under normalized comparison.
    None,
    /// No existing object.
    Create,
    /// Resolvable by ALTER/REPLACE statements.
    Update,
    /// Differs in a way with no safe automatic resolution.
    Invalid,
}

impl SchemaPatchDifference {
    /// Combine per-field classifications; the more severe one wins.
    fn escalate(self, other: SchemaPatchDifference) -> SchemaPatchDifference {
        use SchemaPatchDifference::*;
        match (self, other) {
            (Invalid, _) | (_, Invalid) => Invalid,
            (Update, _) | (_, Update) => Update,
            (Create, _) | (_, Create) => Create,
            (None, None) => None,
        }
    }
}

/// One concrete difference justifying a classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A desired column the existing table lacks.
    MissingColumn(Column),
    /// An existing column the desired table does not declare.
    ExtraColumn(String),
    /// A safely alterable type transition.
    ColumnTypeChanged { name: String, from: String, to: String },
    /// A type transition outside the safe set.
    ColumnTypeIncompatible { name: String, from: String, to: String },
    ColumnNullabilityChanged { name: String, from: bool, to: bool },
    PrimaryKeyChanged { desired: Vec<String>, existing: Vec<String> },
    IndexAdded(Index),
    IndexRemoved(String),
    IndexChanged(Index),
    ForeignKeyAdded(ForeignKey),
    ForeignKeyRemoved(String),
    ForeignKeyChanged(ForeignKey),
    FunctionBodyChanged,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::MissingColumn(col) => write!(f, "+ {}: {}", col.name, col.declared_type),
            Change::ExtraColumn(name) => write!(f, "- {}", name),
            Change::ColumnTypeChanged { name, from, to } => {
                write!(f, "~ {}: {} -> {}", name, from, to)
            }
            Change::ColumnTypeIncompatible { name, from, to } => {
                write!(f, "! {}: {} -> {} (no safe alteration)", name, from, to)
            }
            Change::ColumnNullabilityChanged { name, to, .. } => {
                if *to {
                    write!(f, "~ {}: drop not null", name)
                } else {
                    write!(f, "~ {}: set not null", name)
                }
            }
            Change::PrimaryKeyChanged { desired, existing } => {
                write!(
                    f,
                    "~ PRIMARY KEY ({}) -> ({})",
                    existing.join(", "),
                    desired.join(", ")
                )
            }
            Change::IndexAdded(idx) => write!(f, "+ INDEX {}", idx.name),
            Change::IndexRemoved(name) => write!(f, "- INDEX {}", name),
            Change::IndexChanged(idx) => write!(f, "~ INDEX {}", idx.name),
            Change::ForeignKeyAdded(fk) => write!(f, "+ FOREIGN KEY {}", fk.name),
            Change::ForeignKeyRemoved(name) => write!(f, "- FOREIGN KEY {}", name),
            Change::ForeignKeyChanged(fk) => write!(f, "~ FOREIGN KEY {}", fk.name),
            Change::FunctionBodyChanged => write!(f, "~ body"),
        }
    }
}

/// A classification plus the concrete differences that justify it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub difference: SchemaPatchDifference,
    pub changes: Vec<Change>,
}

impl Delta {
    fn create() -> Self {
        Self { difference: SchemaPatchDifference::Create, changes: Vec::new() }
    }

    fn unchanged() -> Self {
        Self { difference: SchemaPatchDifference::None, changes: Vec::new() }
    }

    pub fn is_unchanged(&self) -> bool {
        self.difference == SchemaPatchDifference::None
    }
}

/// Compare a desired table against its (possibly absent) existing state.
pub fn table_delta(registry: &TypeRegistry, desired: &Table, existing: Option<&Table>) -> Delta {
    let Some(existing) = existing else {
        return Delta::create();
    };

    let mut difference = SchemaPatchDifference::None;
    let mut changes = Vec::new();

    // Columns, as a name-keyed mapping. Order is rendering-only.
    for column in desired.columns() {
        match existing.column(&column.name) {
            None => {
                changes.push(Change::MissingColumn(column.clone()));
                difference = difference.escalate(SchemaPatchDifference::Update);
            }
            Some(current) => {
                match registry.alteration(&current.declared_type, &column.declared_type) {
                    TypeAlteration::Unchanged => {}
                    TypeAlteration::Safe => {
                        changes.push(Change::ColumnTypeChanged {
                            name: column.name.clone(),
                            from: current.declared_type.clone(),
                            to: column.declared_type.clone(),
                        });
                        difference = difference.escalate(SchemaPatchDifference::Update);
                    }
                    TypeAlteration::Incompatible => {
                        changes.push(Change::ColumnTypeIncompatible {
                            name: column.name.clone(),
                            from: current.declared_type.clone(),
                            to: column.declared_type.clone(),
                        });
                        difference = difference.escalate(SchemaPatchDifference::Invalid);
                    }
                }
                if current.nullable != column.nullable {
                    changes.push(Change::ColumnNullabilityChanged {
                        name: column.name.clone(),
                        from: current.nullable,
                        to: column.nullable,
                    });
                    difference = difference.escalate(SchemaPatchDifference::Update);
                }
            }
        }
    }
    for column in existing.columns() {
        if desired.column(&column.name).is_none() {
            changes.push(Change::ExtraColumn(column.name.clone()));
            difference = difference.escalate(SchemaPatchDifference::Update);
        }
    }

    // Primary key, as a set.
    let desired_pk: HashSet<&str> = desired.primary_key_columns().into_iter().collect();
    let existing_pk: HashSet<&str> = existing.primary_key_columns().into_iter().collect();
    if desired_pk != existing_pk {
        changes.push(Change::PrimaryKeyChanged {
            desired: desired.primary_key_columns().iter().map(|s| s.to_string()).collect(),
            existing: existing.primary_key_columns().iter().map(|s| s.to_string()).collect(),
        });
        difference = difference.escalate(SchemaPatchDifference::Update);
    }

    // Indexes, keyed by name.
    for index in desired.indexes() {
        match existing.indexes().iter().find(|i| i.name.eq_ignore_ascii_case(&index.name)) {
            None => {
                changes.push(Change::IndexAdded(index.clone()));
                difference = difference.escalate(SchemaPatchDifference::Update);
            }
            Some(current) if !current.matches(index) => {
                changes.push(Change::IndexChanged(index.clone()));
                difference = difference.escalate(SchemaPatchDifference::Update);
            }
            Some(_) => {}
        }
    }
    for index in existing.indexes() {
        if !desired.indexes().iter().any(|i| i.name.eq_ignore_ascii_case(&index.name)) {
            changes.push(Change::IndexRemoved(index.name.clone()));
            difference = difference.escalate(SchemaPatchDifference::Update);
        }
    }

    // Foreign keys, keyed by name.
    for fk in desired.foreign_keys() {
        match existing.foreign_keys().iter().find(|f| f.name.eq_ignore_ascii_case(&fk.name)) {
            None => {
                changes.push(Change::ForeignKeyAdded(fk.clone()));
                difference = difference.escalate(SchemaPatchDifference::Update);
            }
            Some(current) if !current.matches(fk) => {
                changes.push(Change::ForeignKeyChanged(fk.clone()));
                difference = difference.escalate(SchemaPatchDifference::Update);
            }
            Some(_) => {}
        }
    }
    for fk in existing.foreign_keys() {
        if !desired.foreign_keys().iter().any(|f| f.name.eq_ignore_ascii_case(&fk.name)) {
            changes.push(Change::ForeignKeyRemoved(fk.name.clone()));
            difference = difference.escalate(SchemaPatchDifference::Update);
        }
    }

    if changes.is_empty() { Delta::unchanged() } else { Delta { difference, changes } }
}

/// Compare a desired function against its (possibly absent) existing state.
///
/// A function is always fully replaced, never partially altered, so the only
/// outcomes are `None`, `Create` and `Update`.
pub fn function_delta(
    registry: &TypeRegistry,
    desired: &Function,
    existing: Option<&Function>,
) -> Delta {
    let Some(existing) = existing else {
        return Delta::create();
    };
    if function_fingerprint(registry, desired) == function_fingerprint(registry, existing) {
        Delta::unchanged()
    } else {
        Delta {
            difference: SchemaPatchDifference::Update,
            changes: vec![Change::FunctionBodyChanged],
        }
    }
}

/// The parts of a function definition that constitute its identity for
/// comparison: canonical argument types, the dollar-quoted source, and the
/// language.
///
/// `pg_get_functiondef` orders clauses its own way (`LANGUAGE` before `AS`)
/// and picks its own dollar-quote tag, so comparing whole definitions
/// textually would flag every round-tripped function as changed.
fn function_fingerprint(
    registry: &TypeRegistry,
    function: &Function,
) -> (Vec<String>, String, String) {
    let normalized = normalize_sql(registry, function.body());
    let arguments = function
        .declared_argument_types()
        .iter()
        .map(|t| registry.canonical(t))
        .collect();

    let (source, language) = match (normalized.find("$$"), normalized.rfind("$$")) {
        (Some(start), Some(end)) if end >= start + 2 => {
            let source = normalized[start + 2..end].trim().to_string();
            let language = language_of(&normalized[end + 2..])
                .or_else(|| language_of(&normalized[..start]))
                .unwrap_or_default();
            (source, language)
        }
        _ => (normalized.clone(), String::new()),
    };
    (arguments, source, language)
}

/// The token following the `language` keyword, if any.
fn language_of(text: &str) -> Option<String> {
    let mut tokens = text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty());
    tokens
        .by_ref()
        .find(|t| *t == "language")
        .and_then(|_| tokens.next())
        .map(str::to_string)
}

/// Canonicalize SQL text for comparison.
///
/// Collapses whitespace runs and folds case outside single-quoted literals
/// (quoted content is preserved verbatim), normalizes dollar-quote tags to
/// `$$`, folds `create or replace` to `create`, and maps unambiguous type
/// synonyms to the catalog spelling so a body read back from the server
/// compares equal to the source it was created from.
pub fn normalize_sql(registry: &TypeRegistry, sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut in_quote = false;

    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quote {
            out.push(ch);
            if ch == '\'' {
                // SQL escapes single quotes by doubling them: ''
                if matches!(chars.peek(), Some('\'')) {
                    out.push(chars.next().expect("peeked"));
                } else {
                    in_quote = false;
                }
            }
            continue;
        }

        match ch {
            '\'' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push('\'');
                in_quote = true;
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c.to_ascii_lowercase());
            }
        }
    }

    let collapsed = normalize_dollar_tags(out.trim());
    let folded = collapsed.replace("create or replace function", "create function");
    map_word_synonyms(registry, &folded)
}

/// Rewrite `$tag$ ... $tag$` markers to anonymous `$$` so the server's
/// preferred tag spelling doesn't register as a body change.
fn normalize_dollar_tags(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let mut j = i + 1;
            while j < bytes.len() && is_tag_byte(bytes[j]) {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'$' {
                out.push_str("$$");
                i = j + 1;
                continue;
            }
        }
        // Safe: iterating byte-wise but only ever splitting at ASCII '$'
        let ch = sql[i..].chars().next().expect("in bounds");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn is_tag_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Map identifier-shaped words through the registry's unambiguous synonym
/// table (quoted literals were already folded away from this path).
fn map_word_synonyms(registry: &TypeRegistry, sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut word = String::new();
    let mut in_quote = false;

    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        match registry.word_synonym(word.as_str()) {
            Some(canonical) => out.push_str(canonical),
            None => out.push_str(word),
        }
        word.clear();
    };

    for ch in sql.chars() {
        if in_quote {
            out.push(ch);
            if ch == '\'' {
                in_quote = false;
            }
            continue;
        }
        if ch == '\'' {
            flush(&mut word, &mut out);
            out.push(ch);
            in_quote = true;
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch);
        } else {
            flush(&mut word, &mut out);
            out.push(ch);
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CascadeAction, IndexMethod};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
    }

    fn people() -> Table {
        let mut table = Table::new("tables.people");
        table.add_column("id", "integer").primary_key();
        table.add_column("first_name", "text");
        table.add_column("last_name", "text");
        table
    }

    #[test]
    fn absent_table_is_create() {
        let delta = table_delta(&registry(), &people(), None);
        assert_eq!(delta.difference, SchemaPatchDifference::Create);
    }

    #[test]
    fn identical_tables_are_unchanged() {
        let table = people();
        let delta = table_delta(&registry(), &table, Some(&table));
        assert_eq!(delta.difference, SchemaPatchDifference::None);
        assert!(delta.changes.is_empty());
    }

    #[test]
    fn synonym_spellings_compare_equal() {
        let mut desired = Table::new("people");
        desired.add_column("id", "int").primary_key();
        desired.add_column("name", "varchar");

        let mut existing = Table::new("people");
        existing.add_column("id", "integer").primary_key();
        existing.add_column("name", "character varying");

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::None);
    }

    #[test]
    fn missing_column_is_update() {
        let desired = people();
        let mut existing = Table::new("tables.people");
        existing.add_column("id", "integer").primary_key();
        existing.add_column("first_name", "text");

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(matches!(&delta.changes[0], Change::MissingColumn(col) if col.name == "last_name"));
    }

    #[test]
    fn safe_widening_is_update() {
        let mut desired = Table::new("people");
        desired.add_column("id", "bigint").primary_key();
        let mut existing = Table::new("people");
        existing.add_column("id", "integer").primary_key();

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(matches!(&delta.changes[0], Change::ColumnTypeChanged { name, .. } if name == "id"));
    }

    #[test]
    fn narrowing_is_invalid() {
        let mut desired = Table::new("people");
        desired.add_column("id", "integer").primary_key();
        let mut existing = Table::new("people");
        existing.add_column("id", "bigint").primary_key();

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Invalid);
        assert!(
            matches!(&delta.changes[0], Change::ColumnTypeIncompatible { name, .. } if name == "id")
        );
    }

    #[test]
    fn invalid_dominates_update() {
        let mut desired = Table::new("people");
        desired.add_column("id", "integer").primary_key();
        desired.add_column("age", "text");
        desired.add_column("bio", "text");

        let mut existing = Table::new("people");
        existing.add_column("id", "integer").primary_key();
        existing.add_column("age", "integer");

        let delta = table_delta(&registry(), &desired, Some(&existing));
        // bio missing (Update) + age text<-integer (Invalid)
        assert_eq!(delta.difference, SchemaPatchDifference::Invalid);
        assert_eq!(delta.changes.len(), 2);
    }

    #[test]
    fn nullability_mismatch_is_update() {
        let mut desired = Table::new("people");
        desired.add_column("name", "text").not_null();
        let mut existing = Table::new("people");
        existing.add_column("name", "text");

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(matches!(
            &delta.changes[0],
            Change::ColumnNullabilityChanged { name, from: true, to: false } if name == "name"
        ));
    }

    #[test]
    fn primary_key_mismatch_is_update() {
        let mut desired = Table::new("people");
        desired.add_column("id", "integer").primary_key();
        desired.add_column("tenant_id", "varchar").primary_key();

        let mut existing = Table::new("people");
        existing.add_column("id", "integer").primary_key();
        existing.add_column("tenant_id", "varchar");

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(matches!(&delta.changes[0], Change::PrimaryKeyChanged { .. }));
    }

    #[test]
    fn index_attribute_change_is_update() {
        let mut desired = people();
        desired
            .add_column("email", "text")
            .add_index_with(|idx| idx.method = IndexMethod::Hash);

        let mut existing = people();
        existing.add_column("email", "text").add_index();

        let delta = table_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(
            matches!(&delta.changes[0], Change::IndexChanged(idx) if idx.method == IndexMethod::Hash)
        );
    }

    #[test]
    fn foreign_key_comparison_respects_position_and_actions() {
        let mut states = Table::new("tables.states");
        states.add_column("id", "integer").primary_key();

        let make = |on_delete| {
            let mut table = people();
            table
                .add_column("state_id", "integer")
                .foreign_key_to_with(&states, "id", |fk| fk.on_delete = on_delete);
            table
        };

        let desired = make(CascadeAction::Cascade);
        let matching = make(CascadeAction::Cascade);
        let differing = make(CascadeAction::NoAction);

        assert!(table_delta(&registry(), &desired, Some(&matching)).is_unchanged());
        let delta = table_delta(&registry(), &desired, Some(&differing));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert!(matches!(&delta.changes[0], Change::ForeignKeyChanged(_)));
    }

    const BODY: &str = "CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar) \
                        RETURNS integer AS $$\nBEGIN\n    return 1;\nEND\n$$ LANGUAGE plpgsql;";

    #[test]
    fn absent_function_is_create() {
        let desired = Function::from_sql(BODY).unwrap();
        let delta = function_delta(&registry(), &desired, None);
        assert_eq!(delta.difference, SchemaPatchDifference::Create);
    }

    #[test]
    fn whitespace_only_differences_are_none() {
        let desired = Function::from_sql(BODY).unwrap();
        let reformatted = Function::from_sql(
            "CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar)\n\
             RETURNS integer AS $$\n\n\n  BEGIN\n\t\treturn 1;\n  END\n$$ LANGUAGE plpgsql;",
        )
        .unwrap();
        let delta = function_delta(&registry(), &desired, Some(&reformatted));
        assert_eq!(delta.difference, SchemaPatchDifference::None);
    }

    #[test]
    fn changed_statement_is_update() {
        let desired = Function::from_sql(BODY).unwrap();
        let different = Function::from_sql(
            "CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar) \
             RETURNS integer AS $$\nBEGIN\n    return 2;\nEND\n$$ LANGUAGE plpgsql;",
        )
        .unwrap();
        let delta = function_delta(&registry(), &desired, Some(&different));
        assert_eq!(delta.difference, SchemaPatchDifference::Update);
        assert_eq!(delta.changes, vec![Change::FunctionBodyChanged]);
    }

    #[test]
    fn round_tripped_definitions_compare_equal() {
        // what the author wrote
        let desired = Function::from_sql(
            "CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar) \
             RETURNS integer AS $$\nBEGIN\n    return 1;\nEND\n$$ LANGUAGE plpgsql;",
        )
        .unwrap();
        // what pg_get_functiondef reports back: canonical argument types,
        // reordered clauses, its own dollar-quote tag
        let existing = Function::introspected(
            desired.identifier().clone(),
            "CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity character varying)\n \
             RETURNS integer\n LANGUAGE plpgsql\nAS $function$\nBEGIN\n    return 1;\nEND\n$function$\n"
                .to_string(),
            "entity character varying".to_string(),
        );

        let delta = function_delta(&registry(), &desired, Some(&existing));
        assert_eq!(delta.difference, SchemaPatchDifference::None);
    }

    #[test]
    fn normalization_handles_quotes_case_and_tags() {
        let registry = registry();
        assert_eq!(
            normalize_sql(&registry, "SELECT  'It''s  here'   FROM t"),
            "select 'It''s  here' from t"
        );
        assert_eq!(
            normalize_sql(&registry, "AS $function$ SELECT 1 $function$"),
            "as $$ select 1 $$"
        );
        assert_eq!(
            normalize_sql(&registry, "create or replace function f(a varchar)"),
            "create function f(a character varying)"
        );
        // keyword case is ignored outside literals
        assert_eq!(
            normalize_sql(&registry, "BEGIN Return 1; END"),
            normalize_sql(&registry, "begin return 1; end")
        );
    }
}
