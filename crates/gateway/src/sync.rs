//! Apply configured services, collections and accounts to the database.
//!
//! Sync only inserts and updates. Services or collections removed from the
//! configuration stay in the database until deleted by hand.

use std::sync::Arc;

use {
    ctigate_auth::{AccountStore, store::DEFAULT_TOKEN_TTL_SECS},
    ctigate_config::{AuthConfig, CtigateConfig, DatabaseConfig},
    ctigate_persistence::{Persistence, SqlitePersistence},
    tracing::{debug, info},
};

use crate::error::Result;

/// What a sync run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub services: usize,
    pub collections: usize,
    pub accounts: usize,
}

/// Open the configured database and run every crate's migrations.
pub async fn open_database(
    database: &DatabaseConfig,
    auth: &AuthConfig,
) -> Result<(Arc<SqlitePersistence>, AccountStore)> {
    let persistence = SqlitePersistence::new(&database.url, database.max_connections).await?;
    let ttl_secs = i64::try_from(auth.token_ttl_secs).unwrap_or(DEFAULT_TOKEN_TTL_SECS);
    let accounts =
        AccountStore::new(persistence.pool().clone(), chrono::Duration::seconds(ttl_secs)).await?;
    debug!(url = database.url, "database ready");
    Ok((Arc::new(persistence), accounts))
}

/// Write the services, collections and accounts of `config`.
///
/// Each service is saved with its configuration index, which is the order
/// the registry matches paths in. Reordering the configuration and syncing
/// again reorders the stored services.
pub async fn sync_config(
    persistence: &dyn Persistence,
    accounts: &AccountStore,
    config: &CtigateConfig,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for (position, service) in (0_i64..).zip(&config.services) {
        persistence.save_service(service, position).await?;
        debug!(
            service_id = service.id,
            position,
            service_type = service.service_type().as_str(),
            "service saved"
        );
        report.services += 1;
    }

    for definition in &config.collections {
        let collection = persistence.save_collection(definition).await?;
        persistence
            .attach_collection_to_services(collection.id, &definition.service_ids)
            .await?;
        debug!(
            collection = collection.name,
            services = definition.service_ids.len(),
            "collection saved"
        );
        report.collections += 1;
    }

    for account in &config.accounts {
        accounts
            .create_account(&account.username, &account.password)
            .await?;
        report.accounts += 1;
    }

    info!(
        services = report.services,
        collections = report.collections,
        accounts = report.accounts,
        "configuration synced"
    );
    Ok(report)
}
