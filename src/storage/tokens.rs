use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::schema::Database;
use super::types::{DatabaseError, RefreshTokenRow};
use crate::auth::AccountId;

/// Durable mapping from account id to its long-lived refresh credential.
///
/// Implementations must make `update` an atomic upsert on the account id:
/// concurrent writers for the same account may race, but the surviving row is
/// always one complete credential.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn lookup(&self, account_id: &AccountId) -> Result<Option<SecretString>, DatabaseError>;

    async fn update(
        &self,
        account_id: &AccountId,
        refresh_token: &SecretString,
    ) -> Result<(), DatabaseError>;

    /// Removing an account that has no credential is not an error.
    async fn remove(&self, account_id: &AccountId) -> Result<(), DatabaseError>;
}

#[async_trait]
impl TokenStore for Database {
    async fn lookup(&self, account_id: &AccountId) -> Result<Option<SecretString>, DatabaseError> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            r#"
            SELECT refresh_token
            FROM refresh_tokens
            WHERE account_id = ?
        "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SecretString::from(r.refresh_token)))
    }

    async fn update(
        &self,
        account_id: &AccountId,
        refresh_token: &SecretString,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (account_id, refresh_token, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(account_id.as_str())
        .bind(refresh_token.expose_secret())
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(account_id = %account_id, "Stored refresh token");
        Ok(())
    }

    async fn remove(&self, account_id: &AccountId) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE account_id = ?")
            .bind(account_id.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            account_id = %account_id,
            removed = result.rows_affected(),
            "Removed refresh token"
        );
        Ok(())
    }
}
