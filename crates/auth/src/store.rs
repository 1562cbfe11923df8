use {
    argon2::{
        Argon2,
        password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    },
    chrono::{Duration, Utc},
    ctigate_common::entities::Account,
    secrecy::{ExposeSecret, Secret},
    sha2::{Digest, Sha256},
    sqlx::SqlitePool,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    header::Credentials,
};

/// Default lifetime of an issued bearer token.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Accounts with argon2 password hashes and the bearer tokens issued to them.
///
/// Raw tokens are handed to the client once; only their SHA-256 digest is
/// stored.
#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
    token_ttl: Duration,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    password_hash: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
        }
    }
}

impl AccountStore {
    /// Open the store on `pool`, running the account migrations.
    pub async fn new(pool: SqlitePool, token_ttl: Duration) -> Result<Self> {
        crate::run_migrations(&pool).await?;
        Ok(Self { pool, token_ttl })
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    // ── Accounts ─────────────────────────────────────────────────────────

    /// Create an account, or replace the password of an existing one.
    pub async fn create_account(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<Account> {
        if username.is_empty() {
            return Err(Error::message("username must not be empty"));
        }
        let hash = hash_password(password.expose_secret())?;
        sqlx::query(
            "INSERT INTO accounts (username, password_hash) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET
                password_hash = excluded.password_hash,
                updated_at = datetime('now')",
        )
        .bind(username)
        .bind(&hash)
        .execute(&self.pool)
        .await?;

        let account = self
            .find_by_username(username)
            .await?
            .map(Account::from)
            .ok_or_else(|| Error::message(format!("account {username} vanished after insert")))?;
        info!(username, "account created");
        Ok(account)
    }

    /// Check a username/password pair.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<Option<Account>> {
        let Some(row) = self.find_by_username(username).await? else {
            debug!(username, "unknown account");
            return Ok(None);
        };
        if !verify_password(password.expose_secret(), &row.password_hash) {
            warn!(username, "invalid password");
            return Ok(None);
        }
        Ok(Some(row.into()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, password_hash FROM accounts WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Tokens ───────────────────────────────────────────────────────────

    /// Issue a bearer token for valid credentials.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<Option<String>> {
        let Some(account) = self.verify_credentials(username, password).await? else {
            return Ok(None);
        };
        let token = generate_token();
        let expires_at = (Utc::now() + self.token_ttl).timestamp_millis();
        sqlx::query("INSERT INTO auth_tokens (token_hash, account_id, expires_at) VALUES (?, ?, ?)")
            .bind(sha256_hex(&token))
            .bind(account.id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        debug!(username, "token issued");
        Ok(Some(token))
    }

    /// Resolve a bearer token to its account if it has not expired.
    pub async fn get_account(&self, token: &str) -> Result<Option<Account>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT a.id, a.username FROM auth_tokens t
             JOIN accounts a ON a.id = t.account_id
             WHERE t.token_hash = ? AND t.expires_at > ?",
        )
        .bind(sha256_hex(token))
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, username)| Account { id, username }))
    }

    /// Drop tokens past their expiry.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Resolve the account behind an `Authorization` header.
    ///
    /// No header, or one that cannot be parsed, is anonymous (`Ok(None)`).
    /// Credentials that are present but do not resolve to an account are
    /// [`Error::Unauthorized`].
    pub async fn authenticate_request(
        &self,
        authorization: Option<&str>,
        support_basic_auth: bool,
    ) -> Result<Option<Account>> {
        let Some(value) = authorization.filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        let account = match Credentials::parse(value, support_basic_auth)? {
            None => return Ok(None),
            Some(Credentials::Bearer(token)) => self.get_account(&token).await?,
            Some(Credentials::Basic { username, password }) => {
                self.verify_credentials(&username, &password).await?
            },
        };
        account.map(Some).ok_or(Error::Unauthorized)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn hash_password(password: &str) -> Result<String> {
    use rand::RngCore;

    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash_str: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash_str) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn generate_token() -> String {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, base64::Engine};

    async fn store(ttl: Duration) -> AccountStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        AccountStore::new(pool, ttl).await.unwrap()
    }

    fn secret(s: &str) -> Secret<String> {
        Secret::new(s.to_string())
    }

    #[tokio::test]
    async fn issued_token_resolves_to_account() {
        let store = store(Duration::hours(1)).await;
        let created = store.create_account("alice", &secret("pw")).await.unwrap();

        let token = store
            .authenticate("alice", &secret("pw"))
            .await
            .unwrap()
            .unwrap();
        let account = store.get_account(&token).await.unwrap().unwrap();
        assert_eq!(account, created);
        assert!(store.get_account("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_password_issues_nothing() {
        let store = store(Duration::hours(1)).await;
        store.create_account("alice", &secret("pw")).await.unwrap();
        assert!(
            store
                .authenticate("alice", &secret("nope"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .authenticate("bob", &secret("pw"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn create_account_replaces_password() {
        let store = store(Duration::hours(1)).await;
        let first = store.create_account("alice", &secret("old")).await.unwrap();
        let second = store.create_account("alice", &secret("new")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(
            store
                .verify_credentials("alice", &secret("old"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .verify_credentials("alice", &secret("new"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn expired_tokens_are_ignored_and_cleaned() {
        let store = store(Duration::seconds(-1)).await;
        store.create_account("alice", &secret("pw")).await.unwrap();
        let token = store
            .authenticate("alice", &secret("pw"))
            .await
            .unwrap()
            .unwrap();
        assert!(store.get_account(&token).await.unwrap().is_none());
        assert_eq!(store.cleanup_expired_tokens().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn request_authentication() {
        let store = store(Duration::hours(1)).await;
        store.create_account("alice", &secret("pw")).await.unwrap();
        let token = store
            .authenticate("alice", &secret("pw"))
            .await
            .unwrap()
            .unwrap();

        assert!(store.authenticate_request(None, false).await.unwrap().is_none());
        assert!(
            store
                .authenticate_request(Some("garbage"), false)
                .await
                .unwrap()
                .is_none()
        );

        let bearer = format!("Bearer {token}");
        let account = store
            .authenticate_request(Some(&bearer), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.username, "alice");

        let err = store
            .authenticate_request(Some("Bearer stale"), false)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        let basic = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alice:pw")
        );
        assert!(
            store
                .authenticate_request(Some(&basic), false)
                .await
                .unwrap_err()
                .is_unauthorized()
        );
        assert!(
            store
                .authenticate_request(Some(&basic), true)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }
}
