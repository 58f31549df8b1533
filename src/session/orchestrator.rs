use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::outcome::{
    LoginFailure, RefreshFailure, SessionGrant, SignupFailure, SignupStarted, UserSummary,
};
use crate::{
    clock::Clock,
    config::AuthConfig,
    error::{AuthError, AuthResult},
    password::PasswordHasher,
    signup::{SignupManager, normalize_email},
    store::{CredentialStore, NewUser, SignupAttempt, SignupProfile, User, UserStatus},
    token::TokenService,
};

#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// Result of moving an attempt to its next step.
#[derive(Debug, Clone)]
pub struct SignupStepped {
    pub attempt: SignupAttempt,
    pub signup_token: String,
}

/// Composes the token service and the signup manager into the operations the
/// HTTP layer calls.
#[derive(Clone)]
pub struct SessionOrchestrator {
    tokens: TokenService,
    signups: SignupManager,
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    clock: Arc<dyn Clock>,
}

impl SessionOrchestrator {
    /// # Errors
    /// Returns an error if the configured password hash cost is rejected.
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context("invalid authentication settings")?;
        let hasher = PasswordHasher::new(config.password_hash_cost())
            .context("invalid password hash cost")?;
        Ok(Self {
            tokens: TokenService::new(config, store.clone(), clock.clone()),
            signups: SignupManager::new(store.clone(), clock.clone(), config.signup_attempt_ttl()),
            store,
            hasher,
            clock,
        })
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn signups(&self) -> &SignupManager {
        &self.signups
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Exchange a refresh token for a new access token, rotating the refresh
    /// token once it is older than the rotation threshold.
    ///
    /// # Errors
    /// Returns the [`RefreshFailure`] describing why no session was granted.
    pub async fn refresh_session(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<SessionGrant, RefreshFailure> {
        let Some(token) = refresh_token.filter(|token| !token.is_empty()) else {
            return Err(RefreshFailure::NoSession);
        };

        let claims = self
            .tokens
            .verify_refresh_token(token)
            .map_err(|_| RefreshFailure::InvalidSession)?;

        let record = match self.store.find_refresh_token(claims.token_id).await {
            Ok(Some(record)) if record.user_id == claims.sub => record,
            Ok(Some(_)) => {
                warn!(
                    "Refresh token {} presented for a different user",
                    claims.token_id
                );
                return Err(RefreshFailure::InvalidSession);
            }
            Ok(None) => {
                debug!("Refresh token {} has no record", claims.token_id);
                return Err(RefreshFailure::InvalidSession);
            }
            Err(err) => {
                error!("Failed to load refresh token {}: {err}", claims.token_id);
                return Err(RefreshFailure::Internal);
            }
        };

        let now = self.clock.now();
        if record.revoked {
            warn!("Revoked refresh token {} presented", record.id);
            return Err(RefreshFailure::RevokedSession);
        }
        if record.is_expired_at(now) {
            debug!("Refresh token {} expired at {}", record.id, record.expires_at);
            return Err(RefreshFailure::ExpiredSession);
        }

        let user = match self.store.find_user_by_id(record.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("Refresh token {} belongs to a missing user", record.id);
                return Err(RefreshFailure::InvalidSession);
            }
            Err(err) => {
                error!("Failed to load user {}: {err}", record.user_id);
                return Err(RefreshFailure::Internal);
            }
        };
        if !user.is_active() {
            info!(
                "Refresh refused for user {} with status {}",
                user.id,
                user.status.as_str()
            );
            return Err(RefreshFailure::InactiveAccount);
        }

        let access_token = self
            .tokens
            .issue_access_token(&user)
            .map_err(|_| RefreshFailure::Internal)?;

        let should_rotate = self.tokens.should_rotate(record.id).await.map_err(|err| {
            error!("Failed to evaluate rotation for {}: {err}", record.id);
            RefreshFailure::Internal
        })?;
        let refresh = if should_rotate {
            match self.tokens.rotate(record.id, user.id).await {
                Ok(material) => Some(material),
                Err(AuthError::InvalidToken) => return Err(RefreshFailure::RevokedSession),
                Err(_) => return Err(RefreshFailure::Internal),
            }
        } else {
            None
        };

        Ok(SessionGrant {
            access_token,
            expires_in: self.tokens.access_token_expires_in(),
            user: UserSummary::from(&user),
            refresh,
        })
    }

    /// Start a signup, or resume the live attempt for the email.
    ///
    /// # Errors
    /// Returns [`SignupFailure::AlreadyExists`] when an account uses the email
    /// and [`SignupFailure::Internal`] for everything else.
    pub async fn signup(&self, request: SignupRequest) -> Result<SignupStarted, SignupFailure> {
        let email = normalize_email(&request.email);
        match self.start_or_resume(&email, request).await {
            Ok(started) => Ok(started),
            Err(AuthError::UserExists) => Err(SignupFailure::AlreadyExists),
            Err(err) => {
                error!("Signup failed: {err}");
                Err(SignupFailure::Internal)
            }
        }
    }

    async fn start_or_resume(&self, email: &str, request: SignupRequest) -> AuthResult<SignupStarted> {
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        if let Some(attempt) = self.signups.find_resumable(email).await? {
            return self.resume(&attempt).await;
        }

        let password_hash = self.hash_password(request.password).await?;
        let profile = SignupProfile {
            first_name: Some(request.first_name),
            last_name: Some(request.last_name),
            password_hash: Some(password_hash),
        };

        match self.signups.create(email, profile).await {
            Ok(attempt) => self.started(&attempt, false),
            Err(AuthError::AttemptInProgress) => {
                // A concurrent signup for the same email won the insert.
                let attempt = self
                    .signups
                    .find_resumable(email)
                    .await?
                    .ok_or(AuthError::AttemptNotActive)?;
                self.resume(&attempt).await
            }
            Err(err) => Err(err),
        }
    }

    async fn resume(&self, attempt: &SignupAttempt) -> AuthResult<SignupStarted> {
        let resumed = self.signups.resume(attempt).await?;
        self.started(&resumed, true)
    }

    fn started(&self, attempt: &SignupAttempt, resumed_session: bool) -> AuthResult<SignupStarted> {
        let signup_token =
            self.tokens
                .issue_signup_token(attempt.id, &attempt.email, &attempt.current_step)?;
        Ok(SignupStarted {
            attempt_id: attempt.id,
            email: attempt.email.clone(),
            signup_token,
            current_step: attempt.current_step.clone(),
            completed_steps: attempt.completed_steps.clone(),
            expires_at: attempt.expires_at,
            resumed_session,
        })
    }

    async fn hash_password(&self, password: String) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("password hashing task failed: {err}")))?
            .map_err(AuthError::Internal)
    }

    async fn verify_password(&self, password: String, hash: String) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("password verify task failed: {err}")))
    }

    /// Advance the attempt the signup token is bound to and hand back a token
    /// for the new step.
    ///
    /// # Errors
    /// Returns [`AuthError::AttemptNotActive`] if the attempt is no longer live.
    pub async fn advance_signup(
        &self,
        attempt_id: Uuid,
        next_step: &str,
        completed_step: Option<&str>,
    ) -> AuthResult<SignupStepped> {
        let attempt = self
            .signups
            .advance_step(attempt_id, next_step, completed_step)
            .await?;
        let signup_token =
            self.tokens
                .issue_signup_token(attempt.id, &attempt.email, &attempt.current_step)?;
        Ok(SignupStepped {
            attempt,
            signup_token,
        })
    }

    /// Finish the attempt: create the active account from the collected
    /// profile, mark the attempt completed, then open a session.
    ///
    /// The account is created first so a failed insert leaves the attempt
    /// live for a retry. The unique email on `users` decides concurrent
    /// completions.
    ///
    /// # Errors
    /// - [`AuthError::AttemptNotActive`] when the attempt is no longer live.
    /// - [`AuthError::UserExists`] when the email was registered meanwhile.
    pub async fn complete_signup(&self, attempt_id: Uuid) -> AuthResult<SessionGrant> {
        let attempt = self
            .signups
            .find_live(attempt_id)
            .await?
            .ok_or(AuthError::AttemptNotActive)?;
        let password_hash = attempt.profile.password_hash.clone().ok_or_else(|| {
            AuthError::Internal(anyhow::anyhow!(
                "signup attempt {} has no password hash",
                attempt.id
            ))
        })?;

        let user = self
            .store
            .insert_user(
                NewUser {
                    email: attempt.email.clone(),
                    first_name: attempt.profile.first_name.clone().unwrap_or_default(),
                    last_name: attempt.profile.last_name.clone().unwrap_or_default(),
                    password_hash,
                    email_verified: attempt.email_verified,
                    status: UserStatus::Active,
                },
                self.clock.now(),
            )
            .await?;
        info!("Created user {} from signup attempt {}", user.id, attempt.id);

        if let Err(err) = self.signups.complete(attempt.id).await {
            error!(
                "User {} created but signup attempt {} was not completed: {err}",
                user.id, attempt.id
            );
            return Err(err);
        }

        self.open_session(&user).await
    }

    async fn open_session(&self, user: &User) -> AuthResult<SessionGrant> {
        let access_token = self.tokens.issue_access_token(user)?;
        let refresh = self.tokens.issue_refresh_token(user.id).await?;
        Ok(SessionGrant {
            access_token,
            expires_in: self.tokens.access_token_expires_in(),
            user: UserSummary::from(user),
            refresh: Some(refresh),
        })
    }

    /// Password login.
    ///
    /// # Errors
    /// Returns the [`LoginFailure`] describing why no session was granted.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionGrant, LoginFailure> {
        let email = normalize_email(email);
        let user = match self.store.find_user_by_email(&email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                // Same Argon2 work as a wrong password.
                let _ = self
                    .verify_password(password.to_string(), self.hasher.decoy_hash())
                    .await;
                return Err(LoginFailure::InvalidCredentials);
            }
            Err(err) => {
                error!("Failed to load user for login: {err}");
                return Err(LoginFailure::Internal);
            }
        };

        match self
            .verify_password(password.to_string(), user.password_hash.clone())
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(LoginFailure::InvalidCredentials),
            Err(err) => {
                error!("Password verification failed: {err}");
                return Err(LoginFailure::Internal);
            }
        }

        if !user.is_active() {
            return Err(LoginFailure::InactiveAccount);
        }

        self.open_session(&user).await.map_err(|err| {
            error!("Failed to open session for user {}: {err}", user.id);
            LoginFailure::Internal
        })
    }

    /// Revoke the presented refresh token. Unknown or invalid tokens are
    /// ignored.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the store write fails.
    pub async fn logout(&self, refresh_token: Option<&str>) -> AuthResult<()> {
        let Some(token) = refresh_token else {
            return Ok(());
        };
        let Ok(claims) = self.tokens.verify_refresh_token(token) else {
            return Ok(());
        };
        if self.tokens.revoke(claims.token_id).await? {
            info!("Revoked refresh token {} on logout", claims.token_id);
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the store write fails.
    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        self.tokens.revoke_all(user_id).await
    }
}
