//! Migration planning and application.
//!
//! The planner turns per-object deltas into an ordered statement list. The
//! ordering core ([`MigrationPlan::from_deltas`]) is a pure function; the
//! database only comes in at the edges (introspection before, execution
//! after).
//!
//! Ordering rules:
//! - foreign key drops run before any table work (a referenced table must be
//!   released before it can be destructively altered),
//! - table and function statements run next,
//! - plain index builds follow their tables,
//! - foreign key additions run after *all* tables exist, so a referencing
//!   table never races its referenced table,
//! - concurrent index builds come last, one statement each, outside any
//!   transaction batch.

use crate::Result;
use crate::conn::{Connection, PostgresVersion, Traced, guarded};
use crate::diff::{Change, Delta, SchemaPatchDifference, function_delta, table_delta};
use crate::error::Error;
use crate::ident::ObjectName;
use crate::introspect::Introspector;
use crate::schema::{Index, SchemaObject, Table};
use crate::types::TypeRegistry;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use trellis_sql::SqlFragment;

/// Operating mode controlling whether creation/alteration is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoCreate {
    /// Create wholly absent objects; refuse silently when an update would be
    /// needed.
    CreateOnly,
    /// Create or alter; an unresolvable difference is a reportable error.
    #[default]
    CreateOrUpdate,
    /// Like `CreateOrUpdate`, but unresolvable differences are handled by
    /// destructive drop-and-recreate.
    All,
    /// Plan only, never execute.
    None,
}

impl FromStr for AutoCreate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "createonly" => Ok(AutoCreate::CreateOnly),
            "createorupdate" => Ok(AutoCreate::CreateOrUpdate),
            "all" => Ok(AutoCreate::All),
            "none" => Ok(AutoCreate::None),
            other => Err(Error::MalformedDefinition(format!(
                "unrecognized auto-create mode: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for AutoCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AutoCreate::CreateOnly => "CreateOnly",
            AutoCreate::CreateOrUpdate => "CreateOrUpdate",
            AutoCreate::All => "All",
            AutoCreate::None => "None",
        })
    }
}

/// One statement in a plan, tagged with the object it belongs to.
#[derive(Debug, Clone)]
pub struct PlannedStatement {
    pub object: ObjectName,
    pub sql: String,
    /// `false` for statements that cannot run inside a transaction block
    /// (concurrent index builds); callers wrapping execution in their own
    /// transaction must exclude these.
    pub transactional: bool,
}

/// An object the planner refused to auto-resolve, with the field-level
/// differences that caused the refusal.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub object: ObjectName,
    pub changes: Vec<Change>,
}

impl Rejection {
    pub fn into_error(self) -> Error {
        Error::SchemaMismatch { object: self.object, changes: self.changes }
    }
}

/// A desired object paired with its introspected state and classification —
/// the planner's unit of work.
#[derive(Debug)]
pub struct PlannedObject<'a> {
    pub desired: &'a SchemaObject,
    pub existing: Option<SchemaObject>,
    pub delta: Delta,
}

/// An ordered sequence of statements bringing the database to the desired
/// state, plus any objects the mode refused to resolve.
#[derive(Debug)]
pub struct MigrationPlan {
    mode: AutoCreate,
    statements: Vec<PlannedStatement>,
    rejected: Vec<Rejection>,
}

impl MigrationPlan {
    pub fn mode(&self) -> AutoCreate {
        self.mode
    }

    pub fn statements(&self) -> &[PlannedStatement] {
        &self.statements
    }

    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.rejected.is_empty()
    }

    /// Render the whole plan for review, grouped per object.
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        let mut last: Option<&ObjectName> = None;
        for statement in &self.statements {
            if last != Some(&statement.object) {
                sql.push_str(&format!("-- {}\n", statement.object));
                last = Some(&statement.object);
            }
            sql.push_str(&statement.sql);
            sql.push('\n');
        }
        sql
    }

    /// Order per-object statements into one plan. Pure: no database access.
    pub fn from_deltas(
        mode: AutoCreate,
        version: PostgresVersion,
        objects: Vec<PlannedObject<'_>>,
    ) -> MigrationPlan {
        let mut buckets = Buckets::default();
        let mut rejected = Vec::new();

        for planned in &objects {
            match planned.delta.difference {
                SchemaPatchDifference::None => {}
                SchemaPatchDifference::Create => {
                    emit_create(&mut buckets, planned.desired, version);
                }
                SchemaPatchDifference::Update => match mode {
                    AutoCreate::CreateOnly => {
                        debug!(object = %planned.desired.identifier(), "skipping update in CreateOnly mode");
                    }
                    _ => emit_update(&mut buckets, planned, version, mode),
                },
                SchemaPatchDifference::Invalid => match mode {
                    AutoCreate::CreateOnly => {
                        debug!(object = %planned.desired.identifier(), "skipping invalid delta in CreateOnly mode");
                    }
                    AutoCreate::All => emit_update(&mut buckets, planned, version, mode),
                    AutoCreate::CreateOrUpdate | AutoCreate::None => {
                        rejected.push(Rejection {
                            object: planned.desired.identifier().clone(),
                            changes: planned.delta.changes.clone(),
                        });
                    }
                },
            }
        }

        MigrationPlan { mode, statements: buckets.into_statements(), rejected }
    }

    /// Execute the plan's statements strictly in order.
    ///
    /// There is no atomicity across the plan: each statement commits on its
    /// own, and cancellation or failure leaves the database in whatever
    /// state the last completed statement produced. Returns the number of
    /// statements applied.
    pub async fn apply<C: Connection>(
        &self,
        conn: &C,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if self.mode == AutoCreate::None {
            info!("plan-only mode, not executing {} statement(s)", self.statements.len());
            return Ok(0);
        }
        let traced = Traced::new(conn);
        let mut applied = 0;
        for statement in &self.statements {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            guarded(cancel, traced.batch_execute(&statement.sql)).await?;
            applied += 1;
        }
        info!(statements = applied, "applied migration plan");
        Ok(applied)
    }
}

/// Statement buckets implementing the ordering rules; concatenated in field
/// order.
#[derive(Default)]
struct Buckets {
    fk_drops: Vec<PlannedStatement>,
    objects: Vec<PlannedStatement>,
    indexes: Vec<PlannedStatement>,
    fk_adds: Vec<PlannedStatement>,
    concurrent: Vec<PlannedStatement>,
}

impl Buckets {
    fn into_statements(self) -> Vec<PlannedStatement> {
        let mut out = self.fk_drops;
        out.extend(self.objects);
        out.extend(self.indexes);
        out.extend(self.fk_adds);
        out.extend(self.concurrent);
        out
    }

    fn push_index(&mut self, object: &ObjectName, table: &Table, index: &Index, version: PostgresVersion) {
        let concurrently = version.supports_concurrent_index_builds();
        let sql = index.create_sql(table.identifier(), concurrently);
        if index.is_concurrent && concurrently {
            self.concurrent.push(PlannedStatement {
                object: object.clone(),
                sql,
                transactional: false,
            });
        } else {
            self.indexes.push(PlannedStatement { object: object.clone(), sql, transactional: true });
        }
    }
}

fn statement(object: &ObjectName, sql: String) -> PlannedStatement {
    PlannedStatement { object: object.clone(), sql, transactional: true }
}

fn emit_create(buckets: &mut Buckets, desired: &SchemaObject, version: PostgresVersion) {
    let object = desired.identifier().clone();
    match desired {
        SchemaObject::Table(table) => {
            buckets.objects.push(statement(&object, table.to_sql_string()));
            for index in table.indexes() {
                buckets.push_index(&object, table, index, version);
            }
            for fk in table.foreign_keys() {
                buckets.fk_adds.push(statement(&object, fk.add_sql(table.identifier())));
            }
        }
        SchemaObject::Function(function) => {
            buckets.objects.push(statement(&object, function.to_sql_string()));
        }
    }
}

fn emit_update(
    buckets: &mut Buckets,
    planned: &PlannedObject<'_>,
    version: PostgresVersion,
    mode: AutoCreate,
) {
    let object = planned.desired.identifier().clone();
    match planned.desired {
        SchemaObject::Table(table) => {
            for change in &planned.delta.changes {
                emit_table_change(buckets, &object, table, change, version, mode);
            }
        }
        SchemaObject::Function(function) => {
            // Functions are fully replaced: drop whatever is there (using the
            // catalog's argument signature) and recreate from source.
            if let Some(existing) = &planned.existing {
                for drop in existing.drop_statements() {
                    buckets.objects.push(statement(&object, drop));
                }
            }
            buckets.objects.push(statement(&object, function.to_sql_string()));
        }
    }
}

fn emit_table_change(
    buckets: &mut Buckets,
    object: &ObjectName,
    table: &Table,
    change: &Change,
    version: PostgresVersion,
    mode: AutoCreate,
) {
    match change {
        Change::MissingColumn(column) => {
            buckets.objects.push(statement(
                object,
                format!("ALTER TABLE {} ADD COLUMN {};", table.identifier(), column.to_sql_string()),
            ));
        }
        Change::ExtraColumn(name) => {
            // Dropping data the desired state no longer declares is only
            // permitted in All mode.
            if mode == AutoCreate::All {
                buckets.objects.push(statement(
                    object,
                    format!(
                        "ALTER TABLE {} DROP COLUMN {};",
                        table.identifier(),
                        trellis_sql::quote_ident(name)
                    ),
                ));
            }
        }
        Change::ColumnTypeChanged { name, to, .. } => {
            let name = trellis_sql::quote_ident(name);
            buckets.objects.push(statement(
                object,
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    table.identifier(),
                    name,
                    to,
                    name,
                    to
                ),
            ));
        }
        Change::ColumnTypeIncompatible { name, .. } => {
            // Only reachable in All mode: the update path cannot express
            // this, so rebuild the column destructively.
            let Some(column) = table.column(name) else {
                return;
            };
            let quoted = trellis_sql::quote_ident(name);
            buckets.objects.push(statement(
                object,
                format!("ALTER TABLE {} DROP COLUMN {};", table.identifier(), quoted),
            ));
            buckets.objects.push(statement(
                object,
                format!("ALTER TABLE {} ADD COLUMN {};", table.identifier(), column.to_sql_string()),
            ));
        }
        Change::ColumnNullabilityChanged { name, to, .. } => {
            let action = if *to { "DROP NOT NULL" } else { "SET NOT NULL" };
            buckets.objects.push(statement(
                object,
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} {};",
                    table.identifier(),
                    trellis_sql::quote_ident(name),
                    action
                ),
            ));
        }
        Change::PrimaryKeyChanged { desired, .. } => {
            let constraint = format!("{}_pkey", table.identifier().name());
            buckets.objects.push(statement(
                object,
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                    table.identifier(),
                    trellis_sql::quote_ident(&constraint)
                ),
            ));
            if !desired.is_empty() {
                let columns: Vec<String> =
                    desired.iter().map(|c| trellis_sql::quote_ident(c)).collect();
                buckets.objects.push(statement(
                    object,
                    format!(
                        "ALTER TABLE {} ADD PRIMARY KEY ({});",
                        table.identifier(),
                        columns.join(", ")
                    ),
                ));
            }
        }
        Change::IndexAdded(index) => {
            buckets.push_index(object, table, index, version);
        }
        Change::IndexRemoved(name) => {
            buckets.objects.push(statement(
                object,
                format!(
                    "DROP INDEX {}.{};",
                    trellis_sql::quote_ident(table.identifier().schema()),
                    trellis_sql::quote_ident(name)
                ),
            ));
        }
        Change::IndexChanged(index) => {
            buckets
                .objects
                .push(statement(object, index.drop_sql(table.identifier().schema())));
            buckets.push_index(object, table, index, version);
        }
        Change::ForeignKeyAdded(fk) => {
            buckets.fk_adds.push(statement(object, fk.add_sql(table.identifier())));
        }
        Change::ForeignKeyRemoved(name) => {
            buckets.fk_drops.push(statement(
                object,
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT {};",
                    table.identifier(),
                    trellis_sql::quote_ident(name)
                ),
            ));
        }
        Change::ForeignKeyChanged(fk) => {
            buckets.fk_drops.push(statement(object, fk.drop_sql(table.identifier())));
            buckets.fk_adds.push(statement(object, fk.add_sql(table.identifier())));
        }
        Change::FunctionBodyChanged => {}
    }
}

/// The reconciliation entry point: introspect, diff, order.
pub struct Planner<'a> {
    registry: &'a TypeRegistry,
    mode: AutoCreate,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a TypeRegistry, mode: AutoCreate) -> Self {
        Self { registry, mode }
    }

    /// Ask the introspector for existing state, classify every object, and
    /// order the resulting statements.
    ///
    /// `Invalid` deltas are not an error here: they land in
    /// [`MigrationPlan::rejected`] (in the modes that refuse them) so other,
    /// independent objects still proceed.
    pub async fn plan<C: Connection>(
        &self,
        conn: &C,
        objects: &[SchemaObject],
        cancel: &CancellationToken,
    ) -> Result<MigrationPlan> {
        let introspector = Introspector::new(self.registry);
        let version = introspector.server_version(conn, cancel).await?;
        debug!(%version, mode = %self.mode, objects = objects.len(), "planning migration");

        let mut planned = Vec::with_capacity(objects.len());
        for desired in objects {
            let (existing, delta) = match desired {
                SchemaObject::Table(table) => {
                    let existing = introspector
                        .fetch_table(conn, table.identifier(), cancel)
                        .await?;
                    let delta = table_delta(self.registry, table, existing.as_ref());
                    (existing.map(SchemaObject::Table), delta)
                }
                SchemaObject::Function(function) => {
                    let existing = introspector
                        .fetch_function(conn, function.identifier(), cancel)
                        .await?;
                    let delta = function_delta(self.registry, function, existing.as_ref());
                    (existing.map(SchemaObject::Function), delta)
                }
            };
            planned.push(PlannedObject { desired, existing, delta });
        }

        Ok(MigrationPlan::from_deltas(self.mode, version, planned))
    }

    /// Plan and, unless the mode is [`AutoCreate::None`], apply.
    pub async fn reconcile<C: Connection>(
        &self,
        conn: &C,
        objects: &[SchemaObject],
        cancel: &CancellationToken,
    ) -> Result<MigrationPlan> {
        let plan = self.plan(conn, objects, cancel).await?;
        plan.apply(conn, cancel).await?;
        Ok(plan)
    }
}
