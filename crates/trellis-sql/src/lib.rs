//! SQL text utilities.
//!
//! Identifier and literal quoting, deterministic constraint naming, and the
//! [`CommandBuilder`] / [`SqlFragment`] pair used to assemble DDL statements
//! from composable pieces with driver-level value parameterization.

use postgres_types::ToSql;
use std::fmt;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use trellis_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes,
/// unconditionally.
///
/// # Example
/// ```
/// use trellis_sql::Ident;
/// assert_eq!(format!("{}", Ident("people")), "\"people\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Keywords that must be quoted even though they are lexically plain.
///
/// Not the full PostgreSQL grammar, just the reserved words that show up as
/// table or column names in practice.
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "case", "cast", "check", "collate", "column",
    "constraint", "create", "default", "desc", "distinct", "do", "else", "end", "except", "false",
    "for", "foreign", "from", "grant", "group", "having", "in", "index", "intersect", "into", "is",
    "join", "like", "limit", "not", "null", "offset", "on", "only", "or", "order", "primary",
    "references", "returning", "select", "table", "then", "to", "true", "union", "unique",
    "update", "user", "using", "when", "where", "with",
];

/// Whether an identifier survives a round trip through the server unquoted.
///
/// Unquoted identifiers are folded to lower case, so anything with upper-case
/// characters needs quoting to keep its spelling.
fn needs_quoting(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return true,
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$') {
        return true;
    }
    RESERVED_WORDS.binary_search(&name).is_ok()
}

/// Quote a PostgreSQL identifier only when the name requires it.
///
/// Plain lower-case identifiers render as-is so generated DDL stays readable
/// and byte-stable; reserved words, upper-case or otherwise unsafe names are
/// double-quoted with embedded quotes doubled.
///
/// # Examples
///
/// ```
/// assert_eq!(trellis_sql::quote_ident("people"), "people");
/// assert_eq!(trellis_sql::quote_ident("user"), "\"user\"");
/// assert_eq!(trellis_sql::quote_ident("FirstName"), "\"FirstName\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    if needs_quoting(name) {
        format!("{}", Ident(name))
    } else {
        name.to_string()
    }
}

/// Generate the conventional foreign key constraint name.
///
/// Uses `fkey_{table}_{columns}` with columns joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(trellis_sql::foreign_key_name("people", &["state_id"]), "fkey_people_state_id");
/// assert_eq!(
///     trellis_sql::foreign_key_name("people", &["state_id", "tenant_id"]),
///     "fkey_people_state_id_tenant_id",
/// );
/// ```
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("fkey_{}_{}", table, cols.join("_"))
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by
/// underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(trellis_sql::index_name("people", &["last_name"]), "idx_people_last_name");
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("idx_{}_{}", table, cols.join("_"))
}

/// An accumulating statement buffer.
///
/// Fragments append literal SQL with [`CommandBuilder::push`] and register
/// value parameters with [`CommandBuilder::push_param`], which writes the
/// `$n` placeholder and keeps the value for the driver. Identifiers are never
/// parameters; they go through [`quote_ident`] via
/// [`CommandBuilder::push_ident`].
pub struct CommandBuilder {
    sql: String,
    params: Vec<Box<dyn ToSql + Send + Sync>>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self { sql: String::new(), params: Vec::new() }
    }

    /// Append literal SQL text.
    pub fn push(&mut self, sql: impl AsRef<str>) {
        self.sql.push_str(sql.as_ref());
    }

    /// Append an identifier, quoted only if the name requires it.
    pub fn push_ident(&mut self, name: &str) {
        self.sql.push_str(&quote_ident(name));
    }

    /// Register a value parameter and append its `$n` placeholder.
    pub fn push_param(&mut self, value: impl ToSql + Send + Sync + 'static) {
        self.params.push(Box::new(value));
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    /// The accumulated SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The registered parameters, in placeholder order, shaped for the
    /// driver's query interface.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| {
                let p: &(dyn ToSql + Sync) = p.as_ref();
                p
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Consume the builder, returning the SQL text.
    pub fn into_sql(self) -> String {
        self.sql
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

/// A composable piece of SQL.
///
/// Implementors write themselves into a [`CommandBuilder`]; larger fragments
/// are built out of smaller ones (a table-creation fragment from column
/// fragments and a primary key constraint, a function-creation fragment from
/// the stored body text).
pub trait SqlFragment {
    /// Append this fragment's SQL (and any value parameters) to the buffer.
    fn apply(&self, builder: &mut CommandBuilder);

    /// Whether the rendered text contains the given substring.
    ///
    /// Lets callers probe a generated statement for, say, a table reference
    /// without rendering it themselves.
    fn references(&self, text: &str) -> bool {
        self.to_sql_string().contains(text)
    }

    /// Render this fragment on its own.
    fn to_sql_string(&self) -> String {
        let mut builder = CommandBuilder::new();
        self.apply(&mut builder);
        builder.into_sql()
    }
}
