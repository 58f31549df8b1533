use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{normalize_email, steps};
use crate::{
    clock::Clock,
    error::{AuthError, AuthResult},
    store::{CredentialStore, NewSignupAttempt, SignupAttempt, SignupProfile},
};

/// Owns every status transition of a signup attempt.
///
/// Each transition is a conditional write in the store, so a resume, advance
/// or complete that races the sweep fails with [`AuthError::AttemptNotActive`]
/// instead of acting on a row that has just expired.
#[derive(Clone)]
pub struct SignupManager {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    attempt_ttl: Duration,
}

impl SignupManager {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, attempt_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            attempt_ttl,
        }
    }

    /// Start a new attempt on [`steps::FIRST_STEP`].
    ///
    /// Any expired but unswept attempt for the email is moved to `expired`
    /// first so it cannot block the insert.
    ///
    /// # Errors
    /// - [`AuthError::UserExists`] when an account already uses the email.
    /// - [`AuthError::AttemptInProgress`] when a live attempt exists, including
    ///   when a concurrent `create` wins the insert.
    /// - [`AuthError::Unavailable`] on store failure.
    pub async fn create(&self, email: &str, profile: SignupProfile) -> AuthResult<SignupAttempt> {
        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let now = self.clock.now();
        let reclaimed = self.store.expire_signup_attempts(Some(&email), now).await?;
        if reclaimed > 0 {
            info!("Expired {reclaimed} stale signup attempt(s) before create");
        }
        if !self
            .store
            .find_live_signup_attempts(&email, now, 1)
            .await?
            .is_empty()
        {
            return Err(AuthError::AttemptInProgress);
        }

        let expires_at = now.checked_add_signed(self.attempt_ttl).ok_or_else(|| {
            AuthError::Internal(anyhow::anyhow!("signup attempt expiry is out of range"))
        })?;

        let attempt = self
            .store
            .insert_signup_attempt(NewSignupAttempt {
                id: Uuid::new_v4(),
                email,
                profile,
                current_step: steps::FIRST_STEP.to_string(),
                created_at: now,
                expires_at,
            })
            .await?;

        info!("Created signup attempt {}", attempt.id);
        Ok(attempt)
    }

    /// The live attempt for an email, if any.
    ///
    /// # Errors
    /// Returns [`AuthError::AmbiguousAttempt`] if the store holds more than one
    /// live attempt for the email.
    pub async fn find_resumable(&self, email: &str) -> AuthResult<Option<SignupAttempt>> {
        let email = normalize_email(email);
        let mut rows = self
            .store
            .find_live_signup_attempts(&email, self.clock.now(), 2)
            .await?;
        if rows.len() > 1 {
            let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
            error!("Found multiple live signup attempts for one email: {ids:?}");
            return Err(AuthError::AmbiguousAttempt);
        }
        Ok(rows.pop())
    }

    /// Fetch an attempt by id regardless of status.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] on store failure.
    pub async fn find(&self, attempt_id: Uuid) -> AuthResult<Option<SignupAttempt>> {
        Ok(self.store.find_signup_attempt(attempt_id).await?)
    }

    /// Fetch an attempt only if it is still `in_progress` and unexpired.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] on store failure.
    pub async fn find_live(&self, attempt_id: Uuid) -> AuthResult<Option<SignupAttempt>> {
        let now = self.clock.now();
        Ok(self
            .store
            .find_signup_attempt(attempt_id)
            .await?
            .filter(|attempt| attempt.is_live_at(now)))
    }

    /// Bump `attempt_count`. Step, status and expiry are left unchanged.
    ///
    /// # Errors
    /// Returns [`AuthError::AttemptNotActive`] if the attempt is no longer live.
    pub async fn resume(&self, attempt: &SignupAttempt) -> AuthResult<SignupAttempt> {
        let resumed = self
            .store
            .resume_signup_attempt(attempt.id, self.clock.now())
            .await?
            .ok_or(AuthError::AttemptNotActive)?;
        info!(
            "Resumed signup attempt {} (attempt {})",
            resumed.id, resumed.attempt_count
        );
        Ok(resumed)
    }

    /// Move to `new_step`, recording `completed_step` once and raising its
    /// verification flag.
    ///
    /// # Errors
    /// Returns [`AuthError::AttemptNotActive`] if the attempt is no longer live.
    pub async fn advance_step(
        &self,
        attempt_id: Uuid,
        new_step: &str,
        completed_step: Option<&str>,
    ) -> AuthResult<SignupAttempt> {
        let flag = completed_step.and_then(steps::flag_for);
        self.store
            .advance_signup_attempt(attempt_id, new_step, completed_step, flag, self.clock.now())
            .await?
            .ok_or(AuthError::AttemptNotActive)
    }

    /// Mark the attempt completed. Terminal.
    ///
    /// # Errors
    /// Returns [`AuthError::AttemptNotActive`] if the attempt is no longer live.
    pub async fn complete(&self, attempt_id: Uuid) -> AuthResult<SignupAttempt> {
        let completed = self
            .store
            .complete_signup_attempt(attempt_id, self.clock.now())
            .await?
            .ok_or(AuthError::AttemptNotActive)?;
        info!("Completed signup attempt {}", completed.id);
        Ok(completed)
    }

    /// Expire every `in_progress` attempt past its deadline.
    ///
    /// # Errors
    /// Returns [`AuthError::Unavailable`] on store failure.
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        Ok(self
            .store
            .expire_signup_attempts(None, self.clock.now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        store::{MemoryStore, NewUser, SignupStatus, UserStatus},
    };
    use anyhow::{Context, Result};
    use chrono::Utc;

    const TTL_SECONDS: i64 = 2 * 60 * 60;

    struct Fixture {
        store: MemoryStore,
        clock: ManualClock,
        manager: SignupManager,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let manager = SignupManager::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::seconds(TTL_SECONDS),
        );
        Fixture {
            store,
            clock,
            manager,
        }
    }

    fn profile() -> SignupProfile {
        SignupProfile {
            first_name: Some("Alice".to_string()),
            last_name: Some("Liddell".to_string()),
            password_hash: Some("hash".to_string()),
        }
    }

    fn in_progress(rows: &[SignupAttempt]) -> usize {
        rows.iter()
            .filter(|row| row.status == SignupStatus::InProgress)
            .count()
    }

    #[tokio::test]
    async fn create_initializes_attempt() -> Result<()> {
        let fx = fixture();
        let attempt = fx.manager.create("Alice@Example.com", profile()).await?;
        assert_eq!(attempt.email, "alice@example.com");
        assert_eq!(attempt.current_step, steps::FIRST_STEP);
        assert_eq!(attempt.status, SignupStatus::InProgress);
        assert_eq!(attempt.attempt_count, 1);
        assert!(attempt.completed_steps.is_empty());
        assert_eq!(
            attempt.expires_at - attempt.created_at,
            Duration::seconds(TTL_SECONDS)
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_conflicts_with_existing_user() -> Result<()> {
        let fx = fixture();
        fx.store
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
            .await?;
        let result = fx.manager.create("alice@example.com", profile()).await;
        assert!(matches!(result, Err(AuthError::UserExists)));
        Ok(())
    }

    #[tokio::test]
    async fn create_conflicts_with_live_attempt() -> Result<()> {
        let fx = fixture();
        fx.manager.create("alice@example.com", profile()).await?;
        let result = fx.manager.create("ALICE@example.com", profile()).await;
        assert!(matches!(result, Err(AuthError::AttemptInProgress)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_yield_exactly_one_attempt() -> Result<()> {
        let fx = fixture();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = fx.manager.clone();
                tokio::spawn(async move { manager.create("race@example.com", profile()).await })
            })
            .collect();

        let mut created = 0;
        for result in futures::future::join_all(handles).await {
            match result? {
                Ok(_) => created += 1,
                Err(AuthError::AttemptInProgress) => {}
                Err(other) => anyhow::bail!("unexpected error: {other}"),
            }
        }
        assert_eq!(created, 1);
        let rows = fx.store.signup_attempts_for("race@example.com").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(in_progress(&rows), 1);
        Ok(())
    }

    #[tokio::test]
    async fn resume_increments_count_without_extending_expiry() -> Result<()> {
        let fx = fixture();
        let created = fx.manager.create("alice@example.com", profile()).await?;
        fx.clock.advance(Duration::minutes(30));

        let found = fx
            .manager
            .find_resumable("alice@example.com")
            .await?
            .context("attempt should be resumable")?;
        assert_eq!(found.id, created.id);

        let resumed = fx.manager.resume(&found).await?;
        assert_eq!(resumed.attempt_count, 2);
        assert_eq!(resumed.expires_at, created.expires_at);
        assert_eq!(resumed.current_step, created.current_step);
        assert_eq!(resumed.updated_at, fx.clock.now());
        Ok(())
    }

    #[tokio::test]
    async fn advance_step_is_idempotent_on_completed_set() -> Result<()> {
        let fx = fixture();
        let attempt = fx.manager.create("alice@example.com", profile()).await?;

        fx.manager
            .advance_step(attempt.id, steps::VERIFY_PHONE, Some(steps::VERIFY_EMAIL))
            .await?;
        let advanced = fx
            .manager
            .advance_step(attempt.id, steps::VERIFY_PHONE, Some(steps::VERIFY_EMAIL))
            .await?;
        assert_eq!(advanced.completed_steps, vec![steps::VERIFY_EMAIL.to_string()]);
        assert_eq!(advanced.current_step, steps::VERIFY_PHONE);
        assert!(advanced.email_verified);
        assert!(!advanced.phone_verified);

        let advanced = fx
            .manager
            .advance_step(attempt.id, steps::SETUP_MFA, Some(steps::VERIFY_PHONE))
            .await?;
        assert_eq!(
            advanced.completed_steps,
            vec![
                steps::VERIFY_EMAIL.to_string(),
                steps::VERIFY_PHONE.to_string()
            ]
        );
        assert!(advanced.phone_verified);
        Ok(())
    }

    #[tokio::test]
    async fn completed_attempt_rejects_further_transitions() -> Result<()> {
        let fx = fixture();
        let attempt = fx.manager.create("alice@example.com", profile()).await?;
        let completed = fx.manager.complete(attempt.id).await?;
        assert_eq!(completed.status, SignupStatus::Completed);
        assert_eq!(completed.completed_at, Some(fx.clock.now()));

        assert!(matches!(
            fx.manager.advance_step(attempt.id, steps::REVIEW, None).await,
            Err(AuthError::AttemptNotActive)
        ));
        assert!(matches!(
            fx.manager.complete(attempt.id).await,
            Err(AuthError::AttemptNotActive)
        ));
        assert!(fx.manager.find_resumable("alice@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn sweep_after_ttl_allows_recreation() -> Result<()> {
        let fx = fixture();
        let first = fx.manager.create("alice@example.com", profile()).await?;

        fx.clock.advance(Duration::seconds(TTL_SECONDS));
        assert_eq!(fx.manager.sweep_expired().await?, 0);
        assert!(fx.manager.find_resumable("alice@example.com").await?.is_some());

        fx.clock.advance(Duration::seconds(1));
        assert_eq!(fx.manager.sweep_expired().await?, 1);
        assert_eq!(fx.manager.sweep_expired().await?, 0);

        let swept = fx.manager.find(first.id).await?.context("row missing")?;
        assert_eq!(swept.status, SignupStatus::Expired);
        assert!(fx.manager.find_live(first.id).await?.is_none());
        assert!(fx.manager.find_resumable("alice@example.com").await?.is_none());

        let second = fx.manager.create("alice@example.com", profile()).await?;
        assert_ne!(second.id, first.id);
        Ok(())
    }

    #[tokio::test]
    async fn resume_after_sweep_fails_cleanly() -> Result<()> {
        let fx = fixture();
        let attempt = fx.manager.create("alice@example.com", profile()).await?;
        fx.clock.advance(Duration::seconds(TTL_SECONDS + 1));
        fx.manager.sweep_expired().await?;

        assert!(matches!(
            fx.manager.resume(&attempt).await,
            Err(AuthError::AttemptNotActive)
        ));
        assert!(matches!(
            fx.manager
                .advance_step(attempt.id, steps::VERIFY_PHONE, Some(steps::VERIFY_EMAIL))
                .await,
            Err(AuthError::AttemptNotActive)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn stale_attempt_does_not_block_create_before_sweep() -> Result<()> {
        let fx = fixture();
        let first = fx.manager.create("alice@example.com", profile()).await?;
        fx.clock.advance(Duration::seconds(TTL_SECONDS + 1));

        let second = fx.manager.create("alice@example.com", profile()).await?;
        assert_ne!(second.id, first.id);

        let rows = fx.store.signup_attempts_for("alice@example.com").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(in_progress(&rows), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_completed_step_raises_no_flag() -> Result<()> {
        let fx = fixture();
        let attempt = fx.manager.create("alice@example.com", profile()).await?;
        let advanced = fx
            .manager
            .advance_step(attempt.id, steps::SETUP_MFA, Some(steps::REVIEW))
            .await?;
        assert!(!advanced.email_verified);
        assert!(!advanced.phone_verified);
        assert!(!advanced.mfa_enabled);

        let advanced = fx
            .manager
            .advance_step(attempt.id, steps::REVIEW, Some(steps::SETUP_MFA))
            .await?;
        assert!(advanced.mfa_enabled);
        assert_eq!(advanced.completed_steps.len(), 2);
        Ok(())
    }
}
