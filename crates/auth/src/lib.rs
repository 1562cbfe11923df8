//! Accounts, bearer tokens and `Authorization` header handling.

pub mod error;
pub mod header;
pub mod store;

pub use {
    error::{Error, Result},
    header::Credentials,
    store::AccountStore,
};

/// Run database migrations for the auth crate.
///
/// Shares the pool with the persistence migrations; versions do not overlap.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
