//! The desired-state schema object model.
//!
//! Tables, columns, indexes, foreign keys and stored functions, built through
//! a fluent API and rendered to DDL through [`SqlFragment`] implementations.
//! Instances are value-like snapshots: the same types describe both the
//! desired state (built by the caller) and the existing state (materialized
//! by the introspector), and comparison between the two is the diff engine's
//! job.
//!
//! ## Example
//!
//! ```
//! use trellis::schema::{CascadeAction, IndexMethod, Table};
//!
//! let mut states = Table::new("tables.states");
//! states.add_column("id", "integer").primary_key();
//!
//! let mut people = Table::new("tables.people");
//! people.add_column("id", "integer").primary_key();
//! people.add_column("first_name", "text").add_index();
//! people
//!     .add_column("last_name", "text")
//!     .add_index_with(|idx| idx.method = IndexMethod::Hash);
//! people
//!     .add_column("state_id", "integer")
//!     .foreign_key_to_with(&states, "id", |fk| {
//!         fk.on_delete = CascadeAction::Cascade;
//!     });
//! ```

mod column;
mod foreign_key;
mod function;
mod index;
mod table;

pub use column::{Column, ColumnRef};
pub use foreign_key::{CascadeAction, ForeignKey};
pub use function::Function;
pub use index::{Index, IndexMethod};
pub use table::Table;

use crate::ident::ObjectName;

/// A schema object the planner knows how to reconcile.
#[derive(Debug, Clone)]
pub enum SchemaObject {
    Table(Table),
    Function(Function),
}

impl SchemaObject {
    pub fn identifier(&self) -> &ObjectName {
        match self {
            SchemaObject::Table(table) => table.identifier(),
            SchemaObject::Function(function) => function.identifier(),
        }
    }

    /// The statements needed to remove this object.
    pub fn drop_statements(&self) -> Vec<String> {
        match self {
            SchemaObject::Table(table) => table.drop_statements(),
            SchemaObject::Function(function) => function.drop_statements(),
        }
    }
}

impl From<Table> for SchemaObject {
    fn from(table: Table) -> Self {
        SchemaObject::Table(table)
    }
}

impl From<Function> for SchemaObject {
    fn from(function: Function) -> Self {
        SchemaObject::Function(function)
    }
}
