//! Database connection capability and query tracing.
//!
//! The core depends on a small [`Connection`] trait rather than a concrete
//! client type, so the reconciliation logic stays database-agnostic at the
//! boundary. Implementations exist for `tokio_postgres::Client` and
//! `deadpool_postgres::Object`; the [`Traced`] wrapper logs every statement
//! via tracing spans.

use crate::Result;
use crate::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Trait for database connections that can execute queries.
///
/// Implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<u64, tokio_postgres::Error>> + Send + 'a>>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<dyn Future<Output = std::result::Result<Vec<Row>, tokio_postgres::Error>> + Send + 'a>,
    >;

    /// Execute a query, returning at most one row.
    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<Option<Row>, tokio_postgres::Error>>
                + Send
                + 'a,
        >,
    >;

    /// Execute statements using the simple query protocol (no parameters,
    /// no implicit prepared-statement transaction) — the right shape for DDL.
    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'a>>;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<u64, tokio_postgres::Error>> + Send + 'a>>
    {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<dyn Future<Output = std::result::Result<Vec<Row>, tokio_postgres::Error>> + Send + 'a>,
    > {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<Option<Row>, tokio_postgres::Error>>
                + Send
                + 'a,
        >,
    > {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }

    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'a>>
    {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }
}

impl Connection for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<u64, tokio_postgres::Error>> + Send + 'a>>
    {
        // Deref to the underlying Client to avoid recursion
        let client: &tokio_postgres::Client = self;
        Box::pin(client.execute(sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<dyn Future<Output = std::result::Result<Vec<Row>, tokio_postgres::Error>> + Send + 'a>,
    > {
        let client: &tokio_postgres::Client = self;
        Box::pin(client.query(sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<Option<Row>, tokio_postgres::Error>>
                + Send
                + 'a,
        >,
    > {
        let client: &tokio_postgres::Client = self;
        Box::pin(client.query_opt(sql, params))
    }

    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'a>>
    {
        let client: &tokio_postgres::Client = self;
        Box::pin(client.batch_execute(sql))
    }
}

/// A wrapper around a connection that logs all statements via tracing.
pub struct Traced<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> Traced<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> std::result::Result<u64, tokio_postgres::Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self.conn.execute(sql, params).instrument(span.clone()).await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> std::result::Result<Vec<Row>, tokio_postgres::Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self.conn.query(sql, params).instrument(span.clone()).await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> std::result::Result<Option<Row>, tokio_postgres::Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self.conn.query_opt(sql, params).instrument(span.clone()).await?;
        span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
        Ok(row)
    }

    /// Execute DDL over the simple query protocol.
    pub async fn batch_execute(
        &self,
        sql: &str,
    ) -> std::result::Result<(), tokio_postgres::Error> {
        let span = tracing::debug_span!("db.batch_execute", sql = %sql);
        self.conn.batch_execute(sql).instrument(span).await
    }
}

/// Race a driver future against cooperative cancellation.
///
/// On cancellation the in-flight query is dropped; whatever the last
/// completed statement left in the database stays as-is.
pub(crate) async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = std::result::Result<T, tokio_postgres::Error>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => Ok(res?),
    }
}

/// A server version, ordered by the numeric `server_version_num` form
/// (`130004` is 13.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostgresVersion(u32);

impl PostgresVersion {
    /// Concurrent index builds are only attempted at or above this version.
    pub const CONCURRENT_INDEX_MINIMUM: PostgresVersion = PostgresVersion(130000);

    pub fn from_version_num(num: u32) -> Self {
        Self(num)
    }

    pub fn major(&self) -> u32 {
        self.0 / 10000
    }

    pub fn minor(&self) -> u32 {
        self.0 % 10000
    }

    pub fn supports_concurrent_index_builds(&self) -> bool {
        *self >= Self::CONCURRENT_INDEX_MINIMUM
    }
}

impl fmt::Display for PostgresVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_and_gate() {
        let v12 = PostgresVersion::from_version_num(120010);
        let v13 = PostgresVersion::from_version_num(130004);
        let v16 = PostgresVersion::from_version_num(160002);
        assert!(v12 < v13);
        assert!(!v12.supports_concurrent_index_builds());
        assert!(v13.supports_concurrent_index_builds());
        assert!(v16.supports_concurrent_index_builds());
        assert_eq!(v13.major(), 13);
        assert_eq!(v13.to_string(), "13.4");
    }

    #[tokio::test]
    async fn guarded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = guarded(&cancel, async {
            std::future::pending::<std::result::Result<(), tokio_postgres::Error>>().await
        })
        .await;
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }
}
