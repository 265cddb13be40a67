use axum::{extract::FromRequestParts, http::{header, request::Parts}};
use futures_util::future::BoxFuture;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{error::ChatError, AppError, AppState};

/// Boundary to whatever issues credentials. The messaging core only ever
/// asks one question: does this token map to a user id.
pub trait IdentityVerifier: Send + Sync {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Uuid, ChatError>>;
}

/// Verifier backed by the `tokens` table. The table is written by the
/// account system; we only read it.
pub struct TokenVerifier {
    pool: SqlitePool,
}

impl TokenVerifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl IdentityVerifier for TokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Uuid, ChatError>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT user_id FROM tokens WHERE token=?")
                    .bind(token)
                    .fetch_optional(&self.pool)
                    .await?;

            let Some((user_id,)) = row else {
                return Err(ChatError::AuthenticationFailure);
            };

            Ok(Uuid::parse_str(&user_id)?)
        })
    }
}

/// Extracts the caller's user id from a `Authorization: Bearer <token>` header.
pub struct AuthedUser(pub Uuid);

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ChatError::AuthenticationFailure)?;

        let user_id = state.verifier.verify(token).await?;
        Ok(Self(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn verify_known_token() {
        let pool = pool().await;
        let user = Uuid::now_v7();
        sqlx::query("INSERT INTO tokens (token,user_id) VALUES (?,?)")
            .bind("tok-1")
            .bind(user.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let verifier = TokenVerifier::new(pool);
        assert_eq!(verifier.verify("tok-1").await.unwrap(), user);
    }

    #[tokio::test]
    async fn verify_unknown_token_rejects() {
        let verifier = TokenVerifier::new(pool().await);
        assert!(matches!(
            verifier.verify("nope").await,
            Err(ChatError::AuthenticationFailure)
        ));
    }
}
