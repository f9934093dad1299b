use super::{ForeignKey, Index, Table};
use trellis_sql::{CommandBuilder, SqlFragment, foreign_key_name, index_name};

/// A column definition.
///
/// `declared_type` keeps whatever spelling the author (or the catalog) used;
/// comparison always goes through the type registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub default_expression: Option<String>,
    pub is_primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            default_expression: None,
            is_primary_key: false,
        }
    }
}

impl SqlFragment for Column {
    /// The standalone column definition, as used in `ADD COLUMN`. Primary
    /// key membership is a table-level concern and not rendered here.
    fn apply(&self, builder: &mut CommandBuilder) {
        builder.push_ident(&self.name);
        builder.push(" ");
        builder.push(&self.declared_type);
        if !self.nullable {
            builder.push(" NOT NULL");
        }
        if let Some(default) = &self.default_expression {
            builder.push(" DEFAULT ");
            builder.push(default);
        }
    }
}

/// Mutable handle to a column just added to a [`Table`], carrying the fluent
/// builder operations.
pub struct ColumnRef<'a> {
    pub(super) table: &'a mut Table,
    pub(super) index: usize,
}

impl ColumnRef<'_> {
    fn column_mut(&mut self) -> &mut Column {
        self.table.column_at_mut(self.index)
    }

    fn column_name(&self) -> String {
        self.table.column_at(self.index).name.clone()
    }

    /// Mark the column as part of the primary key. Primary key columns are
    /// implicitly not null.
    pub fn primary_key(mut self) -> Self {
        let column = self.column_mut();
        column.is_primary_key = true;
        column.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.column_mut().nullable = false;
        self
    }

    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.column_mut().default_expression = Some(expression.into());
        self
    }

    /// Attach a plain btree index on this column, named by convention.
    pub fn add_index(self) -> Self {
        self.add_index_with(|_| {})
    }

    /// Attach an index on this column, customized through the closure.
    pub fn add_index_with(self, configure: impl FnOnce(&mut Index)) -> Self {
        let column = self.column_name();
        let name = index_name(self.table.identifier().name(), &[column.as_str()]);
        let mut index = Index::new(name, vec![column]);
        configure(&mut index);
        self.table.add_index(index);
        self
    }

    /// Attach a foreign key from this column to a column of another table,
    /// named by the `fkey_<table>_<columns>` convention.
    pub fn foreign_key_to(self, linked: &Table, column: &str) -> Self {
        self.foreign_key_to_with(linked, column, |_| {})
    }

    /// Attach a foreign key with cascade actions (or other fields) adjusted
    /// through the closure.
    pub fn foreign_key_to_with(
        self,
        linked: &Table,
        column: &str,
        configure: impl FnOnce(&mut ForeignKey),
    ) -> Self {
        let own_column = self.column_name();
        let name = foreign_key_name(self.table.identifier().name(), &[own_column.as_str()]);
        let mut fk = ForeignKey::new(name, linked.identifier().clone());
        fk.column_names = vec![own_column];
        fk.linked_names = vec![column.to_string()];
        configure(&mut fk);
        self.table.add_foreign_key(fk);
        self
    }
}
