//! Single-use password reset tokens.
//!
//! Only the SHA-256 of a token is stored. Consuming a token clears it in the
//! same statement that sets the new password, so a token works at most once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Stores a fresh token for the broker, replacing any earlier one.
pub async fn store_reset_token(pool: &PgPool, broker_id: Uuid, token: &str) -> Result<()> {
    sqlx::query(
        "UPDATE brokers SET reset_token_hash = $1, reset_token_expires_at = $2, updated_at = now() WHERE id = $3",
    )
    .bind(hash_token(token))
    .bind(Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES))
    .bind(broker_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Where reset tokens are consumed.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Sets the password of the broker holding `token_hash` and clears the
    /// token in one step, if it has not expired.
    async fn consume(&self, token_hash: &str, new_password_hash: &str) -> Result<Option<Uuid>>;
}

#[async_trait]
impl ResetTokenStore for PgPool {
    async fn consume(&self, token_hash: &str, new_password_hash: &str) -> Result<Option<Uuid>> {
        Ok(sqlx::query_scalar(
            r#"
            UPDATE brokers
            SET password_hash = $1,
                reset_token_hash = NULL,
                reset_token_expires_at = NULL,
                updated_at = now()
            WHERE reset_token_hash = $2
              AND reset_token_expires_at > now()
            RETURNING id
            "#,
        )
        .bind(new_password_hash)
        .bind(token_hash)
        .fetch_optional(self)
        .await?)
    }
}

/// Sets `new_password_hash` if `token` is valid and unexpired, clearing the
/// token. Returns the broker id, or `None` for an unknown, expired or already
/// used token.
pub async fn reset_password(
    store: &dyn ResetTokenStore,
    token: &str,
    new_password_hash: &str,
) -> Result<Option<Uuid>> {
    store.consume(&hash_token(token), new_password_hash).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use chrono::DateTime;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Account {
        password_hash: Option<String>,
        token: Option<(String, DateTime<Utc>)>,
    }

    /// Broker accounts held in memory, consuming tokens like the `brokers` update.
    #[derive(Default)]
    pub struct MemoryResetStore {
        accounts: Mutex<HashMap<Uuid, Account>>,
    }

    impl MemoryResetStore {
        pub async fn issue(&self, broker_id: Uuid, token: &str, expires_at: DateTime<Utc>) {
            let mut accounts = self.accounts.lock().await;
            accounts.entry(broker_id).or_default().token = Some((hash_token(token), expires_at));
        }

        pub async fn password_of(&self, broker_id: Uuid) -> Option<String> {
            let accounts = self.accounts.lock().await;
            accounts.get(&broker_id).and_then(|a| a.password_hash.clone())
        }
    }

    #[async_trait]
    impl ResetTokenStore for MemoryResetStore {
        async fn consume(&self, token_hash: &str, new_password_hash: &str) -> Result<Option<Uuid>> {
            let now = Utc::now();
            let mut accounts = self.accounts.lock().await;
            for (id, account) in accounts.iter_mut() {
                let matches = account
                    .token
                    .as_ref()
                    .is_some_and(|(hash, expires_at)| hash == token_hash && *expires_at > now);
                if matches {
                    account.token = None;
                    account.password_hash = Some(new_password_hash.to_string());
                    return Ok(Some(*id));
                }
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable_and_differs_from_token() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let store = test_support::MemoryResetStore::default();
        let broker_id = Uuid::new_v4();
        store.issue(broker_id, "late", Utc::now() - Duration::seconds(1)).await;

        assert_eq!(reset_password(&store, "late", "hash").await.unwrap(), None);
        assert_eq!(reset_password(&store, "unknown", "hash").await.unwrap(), None);
        assert_eq!(store.password_of(broker_id).await, None);
    }
}
