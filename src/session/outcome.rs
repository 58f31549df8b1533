//! Success and failure shapes returned by the orchestrator.
//!
//! Failure variants carry no cause. The cause is logged where it happens.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::User;
use crate::token::RefreshTokenMaterial;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub email_verified: bool,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email_verified: user.email_verified,
        }
    }
}

/// An authenticated session. `refresh` is set when a new refresh token was
/// issued and must replace the one the client holds.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub access_token: String,
    pub expires_in: i64,
    pub user: UserSummary,
    pub refresh: Option<RefreshTokenMaterial>,
}

#[derive(Debug, Clone)]
pub struct SignupStarted {
    pub attempt_id: Uuid,
    pub email: String,
    pub signup_token: String,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub resumed_session: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// No refresh token was presented. A normal unauthenticated state.
    NoSession,
    InvalidSession,
    RevokedSession,
    ExpiredSession,
    InactiveAccount,
    Internal,
}

impl RefreshFailure {
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::InvalidSession => "invalid_session",
            Self::RevokedSession => "revoked_session",
            Self::ExpiredSession => "expired_session",
            Self::InactiveAccount => "inactive_account",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoSession => "No active session",
            Self::InvalidSession => "Invalid session",
            Self::RevokedSession => "Session has been revoked",
            Self::ExpiredSession => "Session has expired",
            Self::InactiveAccount => "Account is not active",
            Self::Internal => "Internal server error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupFailure {
    AlreadyExists,
    Internal,
}

impl SignupFailure {
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::AlreadyExists => "An account with this email already exists",
            Self::Internal => "Internal server error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    /// Unknown email and wrong password are not told apart.
    InvalidCredentials,
    InactiveAccount,
    Internal,
}

impl LoginFailure {
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InactiveAccount => "inactive_account",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid email or password",
            Self::InactiveAccount => "Account is not active",
            Self::Internal => "Internal server error",
        }
    }
}
