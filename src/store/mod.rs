//! Credential store boundary.
//!
//! Everything the token service and the signup manager persist goes through
//! [`CredentialStore`]. Every mutation is a single-row conditional update or a
//! count-returning bulk update, so no operation needs a multi-row transaction:
//!
//! - `users.email` is unique.
//! - at most one `signup_attempts` row per email may be `in_progress`.
//! - state transitions only apply to rows still matching the expected status,
//!   which makes a resume that races a sweep fail instead of reviving the row.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::{
    RefreshTokenRecord, SignupAttempt, SignupProfile, SignupStatus, User, UserStatus,
    VerificationFlag,
};
pub use postgres::PgStore;

/// Uniqueness rule that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    UserEmail,
    InProgressAttemptEmail,
    RefreshTokenId,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0:?}")]
    Conflict(UniqueKey),
    #[error("storage backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub status: UserStatus,
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignupAttempt {
    pub id: Uuid,
    pub email: String,
    pub profile: SignupProfile,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// `email` must already be normalized.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Fails with `Conflict(UserEmail)` when the email is taken.
    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User>;

    async fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn insert_refresh_token(&self, token: NewRefreshToken)
        -> StoreResult<RefreshTokenRecord>;

    async fn find_refresh_token(&self, id: Uuid) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Flip `revoked` on one row. Returns `false` when the row is missing or
    /// already revoked.
    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool>;

    /// Flip `revoked` on every live row of the user, returning how many changed.
    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Fails with `Conflict(InProgressAttemptEmail)` when the email already has
    /// an `in_progress` row.
    async fn insert_signup_attempt(&self, attempt: NewSignupAttempt)
        -> StoreResult<SignupAttempt>;

    async fn find_signup_attempt(&self, id: Uuid) -> StoreResult<Option<SignupAttempt>>;

    /// `in_progress` rows for `email` with `expires_at >= now`, newest first.
    /// At most `limit` rows are returned.
    async fn find_live_signup_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SignupAttempt>>;

    /// Increment `attempt_count` on a live row. `None` when the row is no longer
    /// `in_progress` or has expired.
    async fn resume_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>>;

    /// Set `current_step` on a live row, appending `completed_step` when it is
    /// not already recorded and raising the matching verification flag.
    async fn advance_signup_attempt(
        &self,
        id: Uuid,
        current_step: &str,
        completed_step: Option<&str>,
        flag: Option<VerificationFlag>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>>;

    async fn complete_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>>;

    /// Move `in_progress` rows with `expires_at < now` to `expired`. When
    /// `email` is given only that email's rows are considered.
    async fn expire_signup_attempts(
        &self,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}
