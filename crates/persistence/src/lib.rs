//! Storage for services, collections, content blocks, inbox messages, result
//! sets and subscriptions.
//!
//! [`Persistence`] is the seam the gateway talks to; [`SqlitePersistence`] is
//! the sqlx-backed implementation. Timestamp labels are stored as integer
//! microseconds so the `(start, end]` window compares exactly.

pub mod error;
pub mod query;
pub mod sqlite;
pub mod store;

pub use {
    error::{Error, Result},
    query::ContentQuery,
    sqlite::SqlitePersistence,
    store::Persistence,
};

/// Run database migrations for the persistence crate.
///
/// Safe to run against a pool shared with other crates' migrations.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
