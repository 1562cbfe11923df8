use {
    chrono::{DateTime, Utc},
    ctigate_config::CtigateConfig,
    ctigate_gateway::{open_database, sync_config},
    ctigate_persistence::Persistence,
};

/// Apply configured services, collections and accounts.
pub async fn sync(config: &CtigateConfig) -> anyhow::Result<()> {
    let (persistence, accounts) = open_database(&config.database, &config.auth).await?;
    let report = sync_config(persistence.as_ref(), &accounts, config).await?;
    println!(
        "Synced {} service(s), {} collection(s), {} account(s).",
        report.services, report.collections, report.accounts
    );
    Ok(())
}

/// Remove blocks labelled within `(begin, end]` from a collection.
pub async fn delete_blocks(
    config: &CtigateConfig,
    collection: &str,
    begin: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    if let Some(end) = end
        && end <= begin
    {
        anyhow::bail!("--end must be later than --begin");
    }
    let (persistence, _) = open_database(&config.database, &config.auth).await?;
    let removed = persistence
        .delete_content_blocks(collection, begin, end)
        .await?;
    match end {
        Some(end) => println!(
            "Removed {removed} block(s) from {collection} labelled after {begin} up to {end}."
        ),
        None => println!("Removed {removed} block(s) from {collection} labelled after {begin}."),
    }
    Ok(())
}
