use super::{Column, ColumnRef, ForeignKey, Index};
use crate::Result;
use crate::conn::Connection;
use crate::diff::{Delta, table_delta};
use crate::ident::ObjectName;
use crate::introspect::Introspector;
use crate::types::TypeRegistry;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use trellis_sql::{CommandBuilder, SqlFragment, quote_ident};

/// A table definition: identifier, ordered columns, indexes and foreign keys.
///
/// Columns are keyed by (folded) name and keep insertion order: order is
/// significant for `CREATE TABLE` rendering, while comparison of two tables
/// treats columns as a name-keyed set.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    identifier: ObjectName,
    columns: IndexMap<String, Column>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Build a table from a `"schema.name"` (or bare `"name"`) string.
    pub fn new(name: &str) -> Self {
        Self::with_identifier(ObjectName::from_qualified(name))
    }

    pub fn with_identifier(identifier: ObjectName) -> Self {
        Self {
            identifier,
            columns: IndexMap::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &ObjectName {
        &self.identifier
    }

    /// The columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column by name (case-insensitively, like the server).
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(&name.to_ascii_lowercase())
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// The primary key column names, in column order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .values()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Add a column and return a handle for marking it up. Adding a column
    /// with an existing name replaces that definition in place.
    pub fn add_column(&mut self, name: &str, declared_type: &str) -> ColumnRef<'_> {
        let column = Column::new(name, declared_type);
        let entry = self.columns.entry(name.to_ascii_lowercase());
        let index = entry.index();
        entry
            .and_modify(|existing| *existing = column.clone())
            .or_insert(column);
        ColumnRef { table: self, index }
    }

    pub fn add_index(&mut self, index: Index) -> &mut Self {
        self.indexes.push(index);
        self
    }

    /// Attach a foreign key. `column_names` and `linked_names` must
    /// correspond positionally.
    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> &mut Self {
        debug_assert_eq!(
            fk.column_names.len(),
            fk.linked_names.len(),
            "foreign key column lists must have equal length"
        );
        self.foreign_keys.push(fk);
        self
    }

    pub(crate) fn push_column(&mut self, column: Column) {
        self.columns.insert(column.name.to_ascii_lowercase(), column);
    }

    pub(crate) fn mark_primary_key(&mut self, name: &str) {
        if let Some(column) = self.columns.get_mut(&name.to_ascii_lowercase()) {
            column.is_primary_key = true;
            column.nullable = false;
        }
    }

    pub(crate) fn column_at(&self, index: usize) -> &Column {
        let (_, column) = self.columns.get_index(index).expect("column index in range");
        column
    }

    pub(crate) fn column_at_mut(&mut self, index: usize) -> &mut Column {
        let (_, column) = self.columns.get_index_mut(index).expect("column index in range");
        column
    }

    /// The statement removing this table (dependents included, so a
    /// destructive rebuild never trips over leftover constraints).
    pub fn drop_statements(&self) -> Vec<String> {
        vec![format!("DROP TABLE IF EXISTS {} CASCADE;", self.identifier)]
    }

    /// Fetch the existing instance of this table, or `None` if absent.
    pub async fn fetch_existing<C: Connection>(
        &self,
        conn: &C,
        registry: &TypeRegistry,
        cancel: &CancellationToken,
    ) -> Result<Option<Table>> {
        Introspector::new(registry)
            .fetch_table(conn, &self.identifier, cancel)
            .await
    }

    /// Introspect and classify in one call.
    pub async fn fetch_delta<C: Connection>(
        &self,
        conn: &C,
        registry: &TypeRegistry,
        cancel: &CancellationToken,
    ) -> Result<Delta> {
        let existing = self.fetch_existing(conn, registry, cancel).await?;
        Ok(table_delta(registry, self, existing.as_ref()))
    }
}

impl SqlFragment for Table {
    /// The `CREATE TABLE` statement: columns and primary key only. Indexes
    /// and foreign keys are separate statements so the planner can order
    /// them around other objects.
    fn apply(&self, builder: &mut CommandBuilder) {
        let pk_columns = self.primary_key_columns();
        // A multi-column key has to be a table constraint
        let table_pk_constraint = pk_columns.len() > 1;

        builder.push("CREATE TABLE ");
        builder.push(self.identifier.to_string());
        builder.push(" (\n");

        let mut parts: Vec<String> = self
            .columns
            .values()
            .map(|col| {
                let mut def = format!("    {} {}", quote_ident(&col.name), col.declared_type);
                if col.is_primary_key && !table_pk_constraint {
                    def.push_str(" PRIMARY KEY");
                }
                if !col.nullable && (!col.is_primary_key || table_pk_constraint) {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = &col.default_expression {
                    def.push_str(" DEFAULT ");
                    def.push_str(default);
                }
                def
            })
            .collect();

        if table_pk_constraint {
            let quoted: Vec<String> = pk_columns.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("    PRIMARY KEY ({})", quoted.join(", ")));
        }

        builder.push(parts.join(",\n"));
        builder.push("\n);");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CascadeAction, IndexMethod};

    #[test]
    fn create_table_with_single_primary_key() {
        let mut table = Table::new("tables.people");
        table.add_column("id", "integer").primary_key();
        table.add_column("first_name", "text");
        table.add_column("last_name", "text");

        insta::assert_snapshot!(table.to_sql_string(), @r"
        CREATE TABLE tables.people (
            id integer PRIMARY KEY,
            first_name text,
            last_name text
        );
        ");
    }

    #[test]
    fn create_table_with_composite_primary_key() {
        let mut table = Table::new("tables.states");
        table.add_column("id", "integer").primary_key();
        table.add_column("tenant_id", "varchar").primary_key();
        table.add_column("name", "text").not_null();

        insta::assert_snapshot!(table.to_sql_string(), @r"
        CREATE TABLE tables.states (
            id integer NOT NULL,
            tenant_id varchar NOT NULL,
            name text NOT NULL,
            PRIMARY KEY (id, tenant_id)
        );
        ");
    }

    #[test]
    fn adding_a_column_twice_replaces_it() {
        let mut table = Table::new("people");
        table.add_column("id", "integer");
        table.add_column("id", "bigint").primary_key();

        assert_eq!(table.column_count(), 1);
        let id = table.column("id").unwrap();
        assert_eq!(id.declared_type, "bigint");
        assert!(id.is_primary_key);
    }

    #[test]
    fn primary_key_columns_are_derived_in_order() {
        let mut table = Table::new("people");
        table.add_column("id", "integer").primary_key();
        table.add_column("tenant_id", "varchar").primary_key();
        table.add_column("first_name", "text");
        assert_eq!(table.primary_key_columns(), vec!["id", "tenant_id"]);
    }

    #[test]
    fn fluent_index_and_foreign_key_attachment() {
        let mut states = Table::new("tables.states");
        states.add_column("id", "integer").primary_key();

        let mut people = Table::new("tables.people");
        people.add_column("id", "integer").primary_key();
        people.add_column("first_name", "text").add_index();
        people.add_column("last_name", "text").add_index_with(|idx| {
            idx.method = IndexMethod::Hash;
            idx.is_concurrent = true;
        });
        people
            .add_column("state_id", "integer")
            .foreign_key_to_with(&states, "id", |fk| {
                fk.on_delete = CascadeAction::Cascade;
                fk.on_update = CascadeAction::Restrict;
            });

        assert_eq!(people.indexes().len(), 2);
        assert_eq!(people.indexes()[0].name, "idx_people_first_name");
        assert_eq!(people.indexes()[1].method, IndexMethod::Hash);
        assert!(people.indexes()[1].is_concurrent);

        let fk = &people.foreign_keys()[0];
        assert_eq!(fk.name, "fkey_people_state_id");
        assert_eq!(fk.column_names, vec!["state_id"]);
        assert_eq!(fk.linked_names, vec!["id"]);
        assert_eq!(fk.linked_table, ObjectName::new("tables", "states"));
        assert_eq!(fk.on_delete, CascadeAction::Cascade);
        assert_eq!(fk.on_update, CascadeAction::Restrict);
    }

    #[test]
    fn table_fragment_reports_references() {
        let mut table = Table::new("tables.people");
        table.add_column("id", "integer").primary_key();
        assert!(table.references("tables.people"));
        assert!(!table.references("tables.states"));
    }

    #[test]
    fn drop_statement_cascades() {
        let table = Table::new("tables.people");
        assert_eq!(
            table.drop_statements(),
            vec!["DROP TABLE IF EXISTS tables.people CASCADE;".to_string()]
        );
    }
}
