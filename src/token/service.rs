use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec::{AccessClaims, RefreshClaims, SignupClaims, TokenCodec, TokenError, TokenKind};
use crate::{
    clock::Clock,
    config::AuthConfig,
    error::{AuthError, AuthResult},
    store::{CredentialStore, NewRefreshToken, User},
};

/// A persisted refresh token as handed to the transport layer.
#[derive(Debug, Clone)]
pub struct RefreshTokenMaterial {
    pub token: String,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenService {
    codec: Arc<TokenCodec>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    rotation_threshold: Duration,
}

fn invalid(kind: TokenKind, err: &TokenError) -> AuthError {
    match err {
        TokenError::Encode(_) | TokenError::ExpiryOverflow(_) => {
            error!("Failed to sign {kind} token: {err}");
            AuthError::Internal(anyhow::anyhow!("failed to sign {kind} token"))
        }
        TokenError::WrongType { .. } => {
            warn!("Rejected {kind} token: {err}");
            AuthError::InvalidToken
        }
        _ => {
            debug!("Rejected {kind} token: {err}");
            AuthError::InvalidToken
        }
    }
}

impl TokenService {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec: Arc::new(TokenCodec::new(config)),
            store,
            clock,
            rotation_threshold: config.refresh_rotation_threshold(),
        }
    }

    /// Lifetime of an access token in whole seconds.
    #[must_use]
    pub fn access_token_expires_in(&self) -> i64 {
        self.codec.ttl(TokenKind::Access).num_seconds()
    }

    /// # Errors
    /// Returns [`AuthError::Internal`] if signing fails.
    pub fn issue_access_token(&self, user: &User) -> AuthResult<String> {
        self.codec
            .encode_access(user.id, &user.email, self.clock.now())
            .map_err(|err| invalid(TokenKind::Access, &err))
    }

    /// Sign a refresh token under a fresh id and persist its record. The token
    /// is only returned once the record is stored.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the record cannot be stored.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> AuthResult<RefreshTokenMaterial> {
        let now = self.clock.now();
        let token_id = Uuid::new_v4();
        let (token, expires_at) = self
            .codec
            .encode_refresh(user_id, token_id, now)
            .map_err(|err| invalid(TokenKind::Refresh, &err))?;

        self.store
            .insert_refresh_token(NewRefreshToken {
                id: token_id,
                token: token.clone(),
                user_id,
                expires_at,
                created_at: now,
            })
            .await
            .map_err(|err| {
                error!("Failed to persist refresh token for user {user_id}: {err}");
                AuthError::from(err)
            })?;

        Ok(RefreshTokenMaterial {
            token,
            token_id,
            expires_at,
        })
    }

    /// # Errors
    /// Returns [`AuthError::Internal`] if signing fails.
    pub fn issue_signup_token(
        &self,
        attempt_id: Uuid,
        email: &str,
        current_step: &str,
    ) -> AuthResult<String> {
        self.codec
            .encode_signup(attempt_id, email, current_step, self.clock.now())
            .map_err(|err| invalid(TokenKind::Signup, &err))
    }

    /// # Errors
    /// Returns [`AuthError::InvalidToken`] on any verification failure.
    pub fn verify_access_token(&self, token: &str) -> AuthResult<AccessClaims> {
        self.codec
            .decode_access(token, self.clock.now())
            .map_err(|err| invalid(TokenKind::Access, &err))
    }

    /// Checks signature, type and expiry only. Record liveness is the caller's
    /// concern.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] on any verification failure.
    pub fn verify_refresh_token(&self, token: &str) -> AuthResult<RefreshClaims> {
        self.codec
            .decode_refresh(token, self.clock.now())
            .map_err(|err| invalid(TokenKind::Refresh, &err))
    }

    /// # Errors
    /// Returns [`AuthError::InvalidToken`] on any verification failure.
    pub fn verify_signup_token(&self, token: &str) -> AuthResult<SignupClaims> {
        self.codec
            .decode_signup(token, self.clock.now())
            .map_err(|err| invalid(TokenKind::Signup, &err))
    }

    /// True once the record is at least as old as the rotation threshold.
    /// A missing record yields `false`.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the store cannot be read.
    pub async fn should_rotate(&self, token_id: Uuid) -> AuthResult<bool> {
        let Some(record) = self.store.find_refresh_token(token_id).await? else {
            return Ok(false);
        };
        Ok(self.clock.now() - record.created_at >= self.rotation_threshold)
    }

    /// Revoke `old_token_id`, then issue a replacement for `user_id`.
    ///
    /// Losing the revoke to a concurrent rotation or logout yields
    /// [`AuthError::InvalidToken`] and issues nothing. Once the revoke has
    /// committed, a failed issuance is reported as an error rather than as an
    /// unchanged session.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] or [`AuthError::Unavailable`].
    pub async fn rotate(&self, old_token_id: Uuid, user_id: Uuid) -> AuthResult<RefreshTokenMaterial> {
        if !self.store.revoke_refresh_token(old_token_id).await? {
            warn!("Refresh token {old_token_id} was already revoked when rotation began");
            return Err(AuthError::InvalidToken);
        }

        match self.issue_refresh_token(user_id).await {
            Ok(material) => {
                info!(
                    "Rotated refresh token {old_token_id} to {} for user {user_id}",
                    material.token_id
                );
                Ok(material)
            }
            Err(err) => {
                error!(
                    "Refresh token {old_token_id} revoked but replacement issuance failed: {err}"
                );
                Err(err)
            }
        }
    }

    /// Idempotent. Returns whether a live row was flipped.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the store write fails.
    pub async fn revoke(&self, token_id: Uuid) -> AuthResult<bool> {
        Ok(self.store.revoke_refresh_token(token_id).await?)
    }

    /// Revoke every live refresh token of a user.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the store write fails.
    pub async fn revoke_all(&self, user_id: Uuid) -> AuthResult<u64> {
        let count = self.store.revoke_user_refresh_tokens(user_id).await?;
        info!("Revoked {count} refresh tokens for user {user_id}");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::test_secrets,
        store::{MemoryStore, NewUser, UserStatus},
    };
    use anyhow::Result;

    struct Fixture {
        store: MemoryStore,
        clock: ManualClock,
        tokens: TokenService,
    }

    fn fixture() -> Result<Fixture> {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let config = AuthConfig::new(test_secrets())?;
        let tokens = TokenService::new(&config, Arc::new(store.clone()), Arc::new(clock.clone()));
        Ok(Fixture {
            store,
            clock,
            tokens,
        })
    }

    async fn user(fx: &Fixture) -> Result<User> {
        Ok(fx
            .store
            .insert_user(
                NewUser {
                    email: "alice@example.com".to_string(),
                    first_name: "Alice".to_string(),
                    last_name: "Liddell".to_string(),
                    password_hash: "hash".to_string(),
                    email_verified: true,
                    status: UserStatus::Active,
                },
                fx.clock.now(),
            )
            .await?)
    }

    #[tokio::test]
    async fn refresh_issuance_persists_before_returning() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        let material = fx.tokens.issue_refresh_token(user.id).await?;

        let record = fx.store.find_refresh_token(material.token_id).await?;
        let record = record.ok_or_else(|| anyhow::anyhow!("record missing"))?;
        assert_eq!(record.user_id, user.id);
        assert_eq!(record.token, material.token);
        assert!(!record.revoked);

        let claims = fx.tokens.verify_refresh_token(&material.token)?;
        assert_eq!(claims.token_id, material.token_id);
        assert_eq!(claims.sub, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        let access = fx.tokens.issue_access_token(&user)?;
        assert_eq!(fx.tokens.verify_access_token(&access)?.sub, user.id);
        assert!(matches!(
            fx.tokens.verify_refresh_token(&access),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            fx.tokens.verify_signup_token(&access),
            Err(AuthError::InvalidToken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn should_rotate_is_inclusive_at_threshold() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        let material = fx.tokens.issue_refresh_token(user.id).await?;

        fx.clock.advance(Duration::days(7) - Duration::seconds(1));
        assert!(!fx.tokens.should_rotate(material.token_id).await?);

        fx.clock.advance(Duration::seconds(1));
        assert!(fx.tokens.should_rotate(material.token_id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn should_rotate_is_false_for_unknown_id() -> Result<()> {
        let fx = fixture()?;
        assert!(!fx.tokens.should_rotate(Uuid::new_v4()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_is_exactly_once_effective() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        let old = fx.tokens.issue_refresh_token(user.id).await?;

        fx.clock.advance(Duration::days(8));
        let new = fx.tokens.rotate(old.token_id, user.id).await?;

        let rows = fx.store.refresh_tokens_for(user.id).await;
        assert_eq!(rows.len(), 2);
        let old_row = rows.iter().find(|r| r.id == old.token_id);
        assert!(old_row.is_some_and(|r| r.revoked));

        let live: Vec<_> = rows.iter().filter(|r| !r.revoked).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, new.token_id);
        assert!(old_row.is_some_and(|r| live[0].created_at > r.created_at));

        // A second rotation of the same token loses and issues nothing.
        assert!(matches!(
            fx.tokens.rotate(old.token_id, user.id).await,
            Err(AuthError::InvalidToken)
        ));
        assert_eq!(fx.store.refresh_tokens_for(user.id).await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        let material = fx.tokens.issue_refresh_token(user.id).await?;
        assert!(fx.tokens.revoke(material.token_id).await?);
        assert!(!fx.tokens.revoke(material.token_id).await?);
        assert!(!fx.tokens.revoke(Uuid::new_v4()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_flips_every_live_token() -> Result<()> {
        let fx = fixture()?;
        let user = user(&fx).await?;
        for _ in 0..3 {
            fx.tokens.issue_refresh_token(user.id).await?;
        }
        assert_eq!(fx.tokens.revoke_all(user.id).await?, 3);
        assert_eq!(fx.tokens.revoke_all(user.id).await?, 0);
        assert!(fx
            .store
            .refresh_tokens_for(user.id)
            .await
            .iter()
            .all(|r| r.revoked));
        Ok(())
    }
}
