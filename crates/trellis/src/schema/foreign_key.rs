use crate::ident::ObjectName;
use std::fmt;
use trellis_sql::quote_ident;

/// Referential action applied to dependent rows when a referenced row is
/// deleted or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum CascadeAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl CascadeAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CascadeAction::NoAction => "NO ACTION",
            CascadeAction::Restrict => "RESTRICT",
            CascadeAction::Cascade => "CASCADE",
            CascadeAction::SetNull => "SET NULL",
            CascadeAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Decode the single-letter code stored in `pg_constraint.confdeltype` /
    /// `confupdtype`.
    pub(crate) fn from_catalog_code(code: i8) -> Self {
        match code as u8 {
            b'r' => CascadeAction::Restrict,
            b'c' => CascadeAction::Cascade,
            b'n' => CascadeAction::SetNull,
            b'd' => CascadeAction::SetDefault,
            _ => CascadeAction::NoAction,
        }
    }
}

impl fmt::Display for CascadeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A foreign key constraint.
///
/// `column_names` and `linked_names` correspond positionally and must have
/// the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub column_names: Vec<String>,
    pub linked_table: ObjectName,
    pub linked_names: Vec<String>,
    pub on_delete: CascadeAction,
    pub on_update: CascadeAction,
}

impl ForeignKey {
    pub fn new(name: impl Into<String>, linked_table: ObjectName) -> Self {
        Self {
            name: name.into(),
            column_names: Vec::new(),
            linked_table,
            linked_names: Vec::new(),
            on_delete: CascadeAction::default(),
            on_update: CascadeAction::default(),
        }
    }

    /// Render the `ALTER TABLE ... ADD CONSTRAINT` statement. Default
    /// (`NO ACTION`) cascade clauses are omitted, matching what the catalog
    /// stores implicitly.
    pub fn add_sql(&self, table: &ObjectName) -> String {
        let columns: Vec<String> = self.column_names.iter().map(|c| quote_ident(c)).collect();
        let linked: Vec<String> = self.linked_names.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            table,
            quote_ident(&self.name),
            columns.join(", "),
            self.linked_table,
            linked.join(", ")
        );
        if self.on_delete != CascadeAction::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(self.on_delete.as_sql());
        }
        if self.on_update != CascadeAction::NoAction {
            sql.push_str(" ON UPDATE ");
            sql.push_str(self.on_update.as_sql());
        }
        sql.push(';');
        sql
    }

    pub fn drop_sql(&self, table: &ObjectName) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            table,
            quote_ident(&self.name)
        )
    }

    /// Structural equality for diffing, name aside.
    pub fn matches(&self, other: &ForeignKey) -> bool {
        self.column_names == other.column_names
            && self.linked_table == other.linked_table
            && self.linked_names == other.linked_names
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}
