use {ctigate_config::CtigateConfig, ctigate_gateway::open_database, secrecy::Secret};

/// Create an account or replace its password.
pub async fn create_account(
    config: &CtigateConfig,
    username: &str,
    password: String,
) -> anyhow::Result<()> {
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    let (_, accounts) = open_database(&config.database, &config.auth).await?;
    let account = accounts
        .create_account(username, &Secret::new(password))
        .await?;
    println!("Account '{}' saved (id {}).", account.username, account.id);
    Ok(())
}
