//! In-process credential store.
//!
//! Enforces the same uniqueness and conditional-update rules as the
//! `PostgreSQL` schema, with a single lock standing in for row-level atomicity.
//! Used by tests and by `--dsn memory://` local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CredentialStore, NewRefreshToken, NewSignupAttempt, NewUser, RefreshTokenRecord,
    SignupAttempt, SignupStatus, StoreError, StoreResult, UniqueKey, User, UserStatus,
    VerificationFlag,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    signup_attempts: HashMap<Uuid, SignupAttempt>,
}

impl Tables {
    fn live_attempt_mut(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<&mut SignupAttempt> {
        self.signup_attempts
            .get_mut(&id)
            .filter(|attempt| attempt.is_live_at(now))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every refresh token row for a user, oldest first.
    pub async fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .refresh_tokens
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        rows
    }

    /// Every signup attempt row for an email regardless of status.
    pub async fn signup_attempts_for(&self, email: &str) -> Vec<SignupAttempt> {
        let tables = self.tables.lock().await;
        tables
            .signup_attempts
            .values()
            .filter(|row| row.email == email)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(UniqueKey::UserEmail));
        }
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_hash: user.password_hash,
            email_verified: user.email_verified,
            status: user.status,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        user.status = status;
        user.updated_at = now;
        Ok(true)
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> StoreResult<RefreshTokenRecord> {
        let mut tables = self.tables.lock().await;
        if tables.refresh_tokens.contains_key(&token.id) {
            return Err(StoreError::Conflict(UniqueKey::RefreshTokenId));
        }
        let row = RefreshTokenRecord {
            id: token.id,
            token: token.token,
            user_id: token.user_id,
            revoked: false,
            expires_at: token.expires_at,
            created_at: token.created_at,
        };
        tables.refresh_tokens.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_refresh_token(&self, id: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.tables.lock().await.refresh_tokens.get(&id).cloned())
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(match tables.refresh_tokens.get_mut(&id) {
            Some(row) if !row.revoked => {
                row.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut count = 0;
        for row in tables
            .refresh_tokens
            .values_mut()
            .filter(|row| row.user_id == user_id && !row.revoked)
        {
            row.revoked = true;
            count += 1;
        }
        Ok(count)
    }

    async fn insert_signup_attempt(
        &self,
        attempt: NewSignupAttempt,
    ) -> StoreResult<SignupAttempt> {
        let mut tables = self.tables.lock().await;
        if tables
            .signup_attempts
            .values()
            .any(|row| row.email == attempt.email && row.status == SignupStatus::InProgress)
        {
            return Err(StoreError::Conflict(UniqueKey::InProgressAttemptEmail));
        }
        let row = SignupAttempt {
            id: attempt.id,
            email: attempt.email,
            profile: attempt.profile,
            email_verified: false,
            phone_verified: false,
            mfa_enabled: false,
            current_step: attempt.current_step,
            completed_steps: Vec::new(),
            status: SignupStatus::InProgress,
            attempt_count: 1,
            created_at: attempt.created_at,
            updated_at: attempt.created_at,
            expires_at: attempt.expires_at,
            completed_at: None,
        };
        tables.signup_attempts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_signup_attempt(&self, id: Uuid) -> StoreResult<Option<SignupAttempt>> {
        Ok(self.tables.lock().await.signup_attempts.get(&id).cloned())
    }

    async fn find_live_signup_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SignupAttempt>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .signup_attempts
            .values()
            .filter(|row| row.email == email && row.is_live_at(now))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn resume_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.live_attempt_mut(id, now).map(|attempt| {
            attempt.attempt_count += 1;
            attempt.updated_at = now;
            attempt.clone()
        }))
    }

    async fn advance_signup_attempt(
        &self,
        id: Uuid,
        current_step: &str,
        completed_step: Option<&str>,
        flag: Option<VerificationFlag>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.live_attempt_mut(id, now).map(|attempt| {
            attempt.current_step = current_step.to_string();
            if let Some(step) = completed_step {
                if !attempt.completed_steps.iter().any(|s| s == step) {
                    attempt.completed_steps.push(step.to_string());
                }
            }
            match flag {
                Some(VerificationFlag::Email) => attempt.email_verified = true,
                Some(VerificationFlag::Phone) => attempt.phone_verified = true,
                Some(VerificationFlag::Mfa) => attempt.mfa_enabled = true,
                None => {}
            }
            attempt.updated_at = now;
            attempt.clone()
        }))
    }

    async fn complete_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.live_attempt_mut(id, now).map(|attempt| {
            attempt.status = SignupStatus::Completed;
            attempt.completed_at = Some(now);
            attempt.updated_at = now;
            attempt.clone()
        }))
    }

    async fn expire_signup_attempts(
        &self,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut count = 0;
        for attempt in tables.signup_attempts.values_mut().filter(|row| {
            row.status == SignupStatus::InProgress
                && row.expires_at < now
                && email.is_none_or(|email| row.email == email)
        }) {
            attempt.status = SignupStatus::Expired;
            attempt.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
