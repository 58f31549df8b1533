//! `PostgreSQL` credential store.
//!
//! Every statement is a single conditional write; see `sql/schema.sql` for the
//! partial unique index that backs the one-live-attempt-per-email rule.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    CredentialStore, NewRefreshToken, NewSignupAttempt, NewUser, RefreshTokenRecord,
    SignupAttempt, StoreError, StoreResult, UniqueKey, User, UserStatus, VerificationFlag,
};

const SIGNUP_COLUMNS: &str = r"
    id, email, first_name, last_name, password_hash,
    email_verified, phone_verified, mfa_enabled,
    current_step, completed_steps, status, attempt_count,
    created_at, updated_at, expires_at, completed_at
";

const USER_COLUMNS: &str = r"
    id, email, first_name, last_name, password_hash,
    email_verified, status, created_at, updated_at
";

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row)
    }

    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let query = format!(
            r"
            INSERT INTO users
                (email, first_name, last_name, password_hash, email_verified, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {USER_COLUMNS}
            "
        );
        let result = sqlx::query_as::<_, User>(&query)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.password_hash)
            .bind(user.email_verified)
            .bind(user.status.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(UniqueKey::UserEmail)),
            Err(err) => Err(anyhow::Error::new(err).context("failed to insert user").into()),
        }
    }

    async fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let query = "UPDATE users SET status = $2, updated_at = $3 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user status")?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> StoreResult<RefreshTokenRecord> {
        let query = r"
            INSERT INTO refresh_tokens (id, token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, token, user_id, revoked, expires_at, created_at
        ";
        let result = sqlx::query_as::<_, RefreshTokenRecord>(query)
            .bind(token.id)
            .bind(&token.token)
            .bind(token.user_id)
            .bind(token.expires_at)
            .bind(token.created_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict(UniqueKey::RefreshTokenId))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert refresh token")
                .into()),
        }
    }

    async fn find_refresh_token(&self, id: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        let query = r"
            SELECT id, token, user_id, revoked, expires_at, created_at
            FROM refresh_tokens
            WHERE id = $1
        ";
        let row = sqlx::query_as::<_, RefreshTokenRecord>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup refresh token")?;
        Ok(row)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool> {
        let query = "UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        let query =
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke user refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn insert_signup_attempt(
        &self,
        attempt: NewSignupAttempt,
    ) -> StoreResult<SignupAttempt> {
        let query = format!(
            r"
            INSERT INTO signup_attempts
                (id, email, first_name, last_name, password_hash, current_step,
                 status, attempt_count, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'in_progress', 1, $7, $7, $8)
            RETURNING {SIGNUP_COLUMNS}
            "
        );
        let result = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(attempt.id)
            .bind(&attempt.email)
            .bind(&attempt.profile.first_name)
            .bind(&attempt.profile.last_name)
            .bind(&attempt.profile.password_hash)
            .bind(&attempt.current_step)
            .bind(attempt.created_at)
            .bind(attempt.expires_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict(UniqueKey::InProgressAttemptEmail))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert signup attempt")
                .into()),
        }
    }

    async fn find_signup_attempt(&self, id: Uuid) -> StoreResult<Option<SignupAttempt>> {
        let query = format!("SELECT {SIGNUP_COLUMNS} FROM signup_attempts WHERE id = $1");
        let row = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup signup attempt")?;
        Ok(row)
    }

    async fn find_live_signup_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<SignupAttempt>> {
        let query = format!(
            r"
            SELECT {SIGNUP_COLUMNS}
            FROM signup_attempts
            WHERE email = $1
              AND status = 'in_progress'
              AND expires_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "
        );
        let rows = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(email)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup live signup attempts")?;
        Ok(rows)
    }

    async fn resume_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        let query = format!(
            r"
            UPDATE signup_attempts
            SET attempt_count = attempt_count + 1,
                updated_at = $2
            WHERE id = $1
              AND status = 'in_progress'
              AND expires_at >= $2
            RETURNING {SIGNUP_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to resume signup attempt")?;
        Ok(row)
    }

    async fn advance_signup_attempt(
        &self,
        id: Uuid,
        current_step: &str,
        completed_step: Option<&str>,
        flag: Option<VerificationFlag>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        // Array append is guarded by `= ANY` so the completed set keeps
        // insertion order without duplicates.
        let query = format!(
            r"
            UPDATE signup_attempts
            SET current_step = $2,
                completed_steps = CASE
                    WHEN $3::text IS NULL OR $3::text = ANY(completed_steps) THEN completed_steps
                    ELSE array_append(completed_steps, $3::text)
                END,
                email_verified = email_verified OR $4,
                phone_verified = phone_verified OR $5,
                mfa_enabled = mfa_enabled OR $6,
                updated_at = $7
            WHERE id = $1
              AND status = 'in_progress'
              AND expires_at >= $7
            RETURNING {SIGNUP_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(id)
            .bind(current_step)
            .bind(completed_step)
            .bind(flag == Some(VerificationFlag::Email))
            .bind(flag == Some(VerificationFlag::Phone))
            .bind(flag == Some(VerificationFlag::Mfa))
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to advance signup attempt")?;
        Ok(row)
    }

    async fn complete_signup_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SignupAttempt>> {
        let query = format!(
            r"
            UPDATE signup_attempts
            SET status = 'completed',
                completed_at = $2,
                updated_at = $2
            WHERE id = $1
              AND status = 'in_progress'
              AND expires_at >= $2
            RETURNING {SIGNUP_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, SignupAttempt>(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to complete signup attempt")?;
        Ok(row)
    }

    async fn expire_signup_attempts(
        &self,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            UPDATE signup_attempts
            SET status = 'expired',
                updated_at = $1
            WHERE status = 'in_progress'
              AND expires_at < $1
              AND ($2::text IS NULL OR email = $2::text)
        ";
        let result = sqlx::query(query)
            .bind(now)
            .bind(email)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to expire signup attempts")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(tracing::info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(tracing::info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("40001"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
