//! PostgreSQL schema reconciliation.
//!
//! Declare the schema objects you want (tables, indexes, foreign keys,
//! stored functions), point the planner at a live database, and get back the
//! exact DDL needed to close the gap — or have it applied for you.
//!
//! The moving parts, leaves first:
//!
//! - [`ObjectName`] — schema-qualified, case-insensitive identifiers.
//! - [`TypeRegistry`] — type-synonym resolution (`varchar` is `character
//!   varying`); constructed once at startup and passed by reference, never
//!   a global.
//! - [`schema`] — the desired-state object model with its fluent builder.
//! - [`Introspector`] — materializes existing state from the catalog;
//!   absence is `Ok(None)`, never an error.
//! - [`diff`] — pure classification of desired vs existing
//!   ([`SchemaPatchDifference`]): `None`, `Create`, `Update` or `Invalid`.
//! - [`Planner`] / [`MigrationPlan`] — dependency-ordered statements, with
//!   the [`AutoCreate`] mode deciding what may be created, altered or
//!   dropped.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use trellis::schema::{SchemaObject, Table};
//! use trellis::{AutoCreate, Planner, TypeRegistry};
//!
//! # async fn demo(client: tokio_postgres::Client) -> trellis::Result<()> {
//! let registry = TypeRegistry::new();
//!
//! let mut people = Table::new("public.people");
//! people.add_column("id", "integer").primary_key();
//! people.add_column("last_name", "text").add_index();
//!
//! let objects = vec![SchemaObject::from(people)];
//! let planner = Planner::new(&registry, AutoCreate::CreateOrUpdate);
//! let plan = planner.reconcile(&client, &objects, &CancellationToken::new()).await?;
//! println!("{}", plan.to_sql());
//! # Ok(())
//! # }
//! ```
//!
//! Everything database-touching is async, accepts a cancellation token, and
//! runs on whatever task the caller chooses; the crate imposes no threading
//! policy and no cross-statement transaction of its own.

mod conn;
pub mod diff;
mod error;
mod ident;
mod introspect;
mod migrate;
pub mod schema;
mod types;

pub use conn::{Connection, PostgresVersion, Traced};
pub use diff::{Change, Delta, SchemaPatchDifference};
pub use error::Error;
pub use ident::ObjectName;
pub use introspect::Introspector;
pub use migrate::{
    AutoCreate, MigrationPlan, PlannedObject, PlannedStatement, Planner, Rejection,
};
pub use types::{TypeAlteration, TypeRegistry};

// Re-export the statement-building surface so downstream callers don't need
// a direct trellis-sql dependency.
pub use trellis_sql::{CommandBuilder, SqlFragment};

/// Result type for trellis operations.
pub type Result<T> = std::result::Result<T, Error>;
