//! Catalog introspection.
//!
//! Reads `pg_catalog` / `information_schema` metadata and materializes the
//! *existing* instance of a schema object. Absence is data, not failure:
//! every lookup returns `Ok(None)` when the object does not exist. Only real
//! I/O problems (or cancellation) surface as errors.

use crate::Result;
use crate::conn::{Connection, PostgresVersion, Traced, guarded};
use crate::ident::ObjectName;
use crate::schema::{CascadeAction, Column, ForeignKey, Function, Index, IndexMethod, Table};
use crate::types::TypeRegistry;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// format_type keeps length/precision modifiers, which information_schema's
// data_type drops; the registry needs them for round-trip comparison.
const COLUMNS_SQL: &str = r#"
    SELECT
        a.attname,
        pg_catalog.format_type(a.atttypid, a.atttypmod),
        NOT a.attnotnull,
        pg_catalog.pg_get_expr(d.adbin, d.adrelid)
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class t ON t.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1
      AND t.relname = $2
      AND t.relkind = 'r'
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const PRIMARY_KEY_SQL: &str = r#"
    SELECT a.attname
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'p'
      AND a.attnum = ANY(c.conkey)
    ORDER BY array_position(c.conkey, a.attnum)
"#;

const INDEXES_SQL: &str = r#"
    SELECT
        i.relname AS index_name,
        am.amname,
        ix.indisunique,
        ix.indisvalid,
        array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_am am ON am.oid = i.relam
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
    WHERE n.nspname = $1
      AND t.relname = $2
      AND NOT ix.indisprimary
    GROUP BY i.relname, am.amname, ix.indisunique, ix.indisvalid
    ORDER BY i.relname
"#;

const FOREIGN_KEYS_SQL: &str = r#"
    SELECT
        c.conname AS fk_name,
        array_agg(a.attname ORDER BY array_position(c.conkey, a.attnum)) AS columns,
        rn.nspname AS linked_schema,
        rt.relname AS linked_table,
        array_agg(ra.attname ORDER BY array_position(c.confkey, ra.attnum)) AS linked_columns,
        c.confdeltype,
        c.confupdtype
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = ANY(c.confkey)
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'f'
    GROUP BY c.conname, rn.nspname, rt.relname, c.confdeltype, c.confupdtype
    ORDER BY c.conname
"#;

const FUNCTION_SQL: &str = r#"
    SELECT
        pg_catalog.pg_get_functiondef(p.oid),
        pg_catalog.pg_get_function_identity_arguments(p.oid)
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind = 'f'
    ORDER BY p.oid
    LIMIT 1
"#;

const TABLE_INVENTORY_SQL: &str = r#"
    SELECT schemaname, tablename
    FROM pg_catalog.pg_tables
    WHERE schemaname = ANY($1)
    ORDER BY schemaname, tablename
"#;

const FUNCTION_INVENTORY_SQL: &str = r#"
    SELECT n.nspname, p.proname
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = ANY($1) AND p.prokind = 'f'
    ORDER BY n.nspname, p.proname
"#;

/// Reads existing schema objects out of the catalog.
///
/// Holds the type registry by reference; the registry is the process-wide
/// read-only value the caller constructed at startup.
pub struct Introspector<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Introspector<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    /// Materialize the existing instance of a table, or `None` if absent.
    pub async fn fetch_table<C: Connection>(
        &self,
        conn: &C,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Option<Table>> {
        let traced = Traced::new(conn);
        let key: [&(dyn tokio_postgres::types::ToSql + Sync); 2] = [&name.schema(), &name.name()];

        let rows = guarded(cancel, traced.query(COLUMNS_SQL, &key)).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut table = Table::with_identifier(name.clone());
        for row in rows {
            table.push_column(Column {
                name: row.get(0),
                declared_type: row.get(1),
                nullable: row.get(2),
                default_expression: row.get(3),
                is_primary_key: false,
            });
        }

        for row in guarded(cancel, traced.query(PRIMARY_KEY_SQL, &key)).await? {
            let column: String = row.get(0);
            table.mark_primary_key(&column);
        }

        for row in guarded(cancel, traced.query(INDEXES_SQL, &key)).await? {
            let method: String = row.get(1);
            // An invalid index is one being (or left over from) a concurrent
            // build; that state is the only concurrency signal the catalog
            // keeps.
            let is_valid: bool = row.get(3);
            let mut index = Index::new(row.get::<_, String>(0), row.get(4));
            index.method = IndexMethod::from_catalog_name(&method);
            index.is_unique = row.get(2);
            index.is_concurrent = !is_valid;
            table.add_index(index);
        }

        for row in guarded(cancel, traced.query(FOREIGN_KEYS_SQL, &key)).await? {
            let linked_schema: String = row.get(2);
            let linked_table: String = row.get(3);
            let mut fk = ForeignKey::new(
                row.get::<_, String>(0),
                ObjectName::new(linked_schema, linked_table),
            );
            fk.column_names = row.get(1);
            fk.linked_names = row.get(4);
            fk.on_delete = CascadeAction::from_catalog_code(row.get(5));
            fk.on_update = CascadeAction::from_catalog_code(row.get(6));
            table.add_foreign_key(fk);
        }

        debug!(
            table = %name,
            columns = table.column_count(),
            indexes = table.indexes().len(),
            foreign_keys = table.foreign_keys().len(),
            "introspected table"
        );
        Ok(Some(table))
    }

    /// Materialize the existing instance of a function, or `None` if absent.
    ///
    /// The routine definition and identity argument signature are both kept,
    /// so the diff engine can compare bodies and drop statements can match
    /// the catalog's argument spelling exactly.
    pub async fn fetch_function<C: Connection>(
        &self,
        conn: &C,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Option<Function>> {
        let traced = Traced::new(conn);
        let key: [&(dyn tokio_postgres::types::ToSql + Sync); 2] = [&name.schema(), &name.name()];
        let row = guarded(cancel, traced.query_opt(FUNCTION_SQL, &key)).await?;
        Ok(row.map(|row| Function::introspected(name.clone(), row.get(0), row.get(1))))
    }

    /// All table identifiers within the given schemas.
    pub async fn existing_tables<C: Connection>(
        &self,
        conn: &C,
        schemas: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectName>> {
        self.inventory(conn, TABLE_INVENTORY_SQL, schemas, cancel).await
    }

    /// All function identifiers within the given schemas.
    pub async fn existing_functions<C: Connection>(
        &self,
        conn: &C,
        schemas: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectName>> {
        self.inventory(conn, FUNCTION_INVENTORY_SQL, schemas, cancel).await
    }

    async fn inventory<C: Connection>(
        &self,
        conn: &C,
        sql: &str,
        schemas: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectName>> {
        let traced = Traced::new(conn);
        let rows = guarded(cancel, traced.query(sql, &[&schemas])).await?;
        Ok(rows
            .into_iter()
            .map(|row| ObjectName::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    /// The connected server's version, read once and kept as a comparable
    /// value for version-gated behavior.
    pub async fn server_version<C: Connection>(
        &self,
        conn: &C,
        cancel: &CancellationToken,
    ) -> Result<PostgresVersion> {
        let traced = Traced::new(conn);
        let row = guarded(
            cancel,
            traced.query_opt("SELECT current_setting('server_version_num')", &[]),
        )
        .await?;
        let num = row
            .map(|row| row.get::<_, String>(0))
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or_else(|| {
                tracing::warn!("server did not report a parseable server_version_num");
                0
            });
        Ok(PostgresVersion::from_version_num(num))
    }
}
