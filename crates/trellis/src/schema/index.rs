use crate::ident::ObjectName;
use std::fmt;
use trellis_sql::quote_ident;

/// Index access methods the engine knows how to render and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gin,
    Gist,
    Brin,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gin => "gin",
            IndexMethod::Gist => "gist",
            IndexMethod::Brin => "brin",
        }
    }

    /// Resolve a catalog access method name; unknown methods read back as
    /// btree so introspection never fails on an exotic index.
    pub fn from_catalog_name(name: &str) -> Self {
        match name {
            "hash" => IndexMethod::Hash,
            "gin" => IndexMethod::Gin,
            "gist" => IndexMethod::Gist,
            "brin" => IndexMethod::Brin,
            _ => IndexMethod::Btree,
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A secondary index on a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub method: IndexMethod,
    pub is_unique: bool,
    /// Build the index without locking the table. Changes the DDL form and
    /// plan placement, not index identity: a concurrent build cannot run in
    /// a transaction block, so it is never batched with other DDL.
    pub is_concurrent: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            method: IndexMethod::default(),
            is_unique: false,
            is_concurrent: false,
        }
    }

    /// Render the creation statement.
    ///
    /// `concurrently` is the version gate: below server version 13 callers
    /// get the plain locking form even for a concurrent-flagged index.
    pub fn create_sql(&self, table: &ObjectName, concurrently: bool) -> String {
        let unique = if self.is_unique { "UNIQUE " } else { "" };
        let concurrent = if self.is_concurrent && concurrently {
            "CONCURRENTLY "
        } else {
            ""
        };
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {}{} ON {} USING {} ({});",
            unique,
            concurrent,
            quote_ident(&self.name),
            table,
            self.method,
            columns.join(", ")
        )
    }

    /// Render the drop statement. `DROP INDEX` addresses the index by its
    /// own schema-qualified name, not through the table.
    pub fn drop_sql(&self, schema: &str) -> String {
        format!("DROP INDEX {}.{};", quote_ident(schema), quote_ident(&self.name))
    }

    /// Structural equality for diffing: name aside, an index is the same if
    /// its columns, method and uniqueness agree. The concurrent flag is a
    /// build-time property and deliberately not part of identity.
    pub fn matches(&self, other: &Index) -> bool {
        self.columns == other.columns
            && self.method == other.method
            && self.is_unique == other.is_unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> ObjectName {
        ObjectName::new("tables", "people")
    }

    #[test]
    fn renders_plain_index() {
        let index = Index::new("idx_people_last_name", vec!["last_name".to_string()]);
        assert_eq!(
            index.create_sql(&people(), true),
            "CREATE INDEX idx_people_last_name ON tables.people USING btree (last_name);"
        );
    }

    #[test]
    fn renders_hash_method_and_unique() {
        let mut index = Index::new("idx_people_last_name", vec!["last_name".to_string()]);
        index.method = IndexMethod::Hash;
        index.is_unique = true;
        assert_eq!(
            index.create_sql(&people(), true),
            "CREATE UNIQUE INDEX idx_people_last_name ON tables.people USING hash (last_name);"
        );
    }

    #[test]
    fn concurrent_form_is_version_gated() {
        let mut index = Index::new("idx_people_last_name", vec!["last_name".to_string()]);
        index.is_concurrent = true;
        assert_eq!(
            index.create_sql(&people(), true),
            "CREATE INDEX CONCURRENTLY idx_people_last_name ON tables.people USING btree (last_name);"
        );
        assert_eq!(
            index.create_sql(&people(), false),
            "CREATE INDEX idx_people_last_name ON tables.people USING btree (last_name);"
        );
    }

    #[test]
    fn drop_addresses_the_index_directly() {
        let index = Index::new("idx_people_last_name", vec!["last_name".to_string()]);
        assert_eq!(index.drop_sql("tables"), "DROP INDEX tables.idx_people_last_name;");
    }

    #[test]
    fn concurrent_flag_is_not_identity() {
        let a = Index::new("idx", vec!["c".to_string()]);
        let mut b = a.clone();
        b.is_concurrent = true;
        assert!(a.matches(&b));
        b.method = IndexMethod::Hash;
        assert!(!a.matches(&b));
    }
}
