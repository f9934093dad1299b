use crate::diff::Change;
use crate::ident::ObjectName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A definition could not be parsed before any database interaction.
    #[error("malformed definition: {0}")]
    MalformedDefinition(String),

    /// An existing object differs from the desired one in a way that has no
    /// safe automatic resolution.
    #[error("schema mismatch on {object}: {}", format_changes(.changes))]
    SchemaMismatch {
        object: ObjectName,
        changes: Vec<Change>,
    },

    /// Cooperative cancellation was observed mid-operation. Statements
    /// already executed stay applied.
    #[error("operation cancelled")]
    Cancelled,
}

fn format_changes(changes: &[Change]) -> String {
    changes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
