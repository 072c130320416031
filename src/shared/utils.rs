use anyhow::Context;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};

use super::errors::ServiceError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Bounded wait for row and advisory locks inside `locked_transaction`.
pub const LOCK_WAIT_MS: u32 = 5_000;

pub fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_connections)
        .build(manager)
        .context("failed to build database connection pool")
}

/// Runs `f` inside a transaction with a bounded lock wait.
///
/// A lock wait that exceeds `LOCK_WAIT_MS` aborts the whole transaction
/// and surfaces as `ServiceError::Contention`, so callers retry the
/// entire logical operation rather than a partially applied step.
pub fn locked_transaction<T, F>(conn: &mut PgConnection, f: F) -> Result<T, ServiceError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ServiceError>,
{
    conn.transaction(|conn| {
        // SET LOCAL does not accept bind parameters.
        diesel::sql_query(format!("SET LOCAL lock_timeout = '{LOCK_WAIT_MS}ms'"))
            .execute(conn)?;
        f(conn)
    })
}

/// Takes a transaction-scoped advisory lock on an arbitrary string key.
///
/// Released automatically at commit or rollback, so it stays held until
/// the owning row is durably written.
pub fn advisory_xact_lock(conn: &mut PgConnection, key: &str) -> Result<(), ServiceError> {
    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind::<diesel::sql_types::Text, _>(key)
        .execute(conn)?;
    Ok(())
}
