//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::session::{SessionGrant, SignupStarted, SignupStepped, UserSummary};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupResponse {
    pub attempt_id: Uuid,
    pub email: String,
    pub signup_token: String,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resumed_session: bool,
}

impl From<SignupStarted> for SignupResponse {
    fn from(started: SignupStarted) -> Self {
        Self {
            attempt_id: started.attempt_id,
            email: started.email,
            signup_token: started.signup_token,
            current_step: started.current_step,
            completed_steps: started.completed_steps,
            expires_at: started.expires_at,
            resumed_session: started.resumed_session,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupStepRequest {
    pub next_step: String,
    #[serde(default)]
    pub completed_step: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupStepResponse {
    pub attempt_id: Uuid,
    pub signup_token: String,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub mfa_enabled: bool,
}

impl From<SignupStepped> for SignupStepResponse {
    fn from(stepped: SignupStepped) -> Self {
        let attempt = stepped.attempt;
        Self {
            attempt_id: attempt.id,
            signup_token: stepped.signup_token,
            current_step: attempt.current_step,
            completed_steps: attempt.completed_steps,
            email_verified: attempt.email_verified,
            phone_verified: attempt.phone_verified,
            mfa_enabled: attempt.mfa_enabled,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub email_verified: bool,
}

impl From<UserSummary> for UserResponse {
    fn from(user: UserSummary) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            email_verified: user.email_verified,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

impl From<SessionGrant> for SessionResponse {
    fn from(grant: SessionGrant) -> Self {
        Self {
            access_token: grant.access_token,
            token_type: "Bearer".to_string(),
            expires_in: grant.expires_in,
            user: grant.user.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

/// Body of every failure response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn started(resumed_session: bool) -> SignupStarted {
        SignupStarted {
            attempt_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            signup_token: "token".to_string(),
            current_step: "verify_email".to_string(),
            completed_steps: Vec::new(),
            expires_at: Utc::now(),
            resumed_session,
        }
    }

    #[test]
    fn resumed_session_is_omitted_when_false() -> Result<()> {
        let value = serde_json::to_value(SignupResponse::from(started(false)))?;
        assert!(value.get("resumed_session").is_none());

        let value = serde_json::to_value(SignupResponse::from(started(true)))?;
        let resumed = value
            .get("resumed_session")
            .and_then(serde_json::Value::as_bool)
            .context("missing resumed_session")?;
        assert!(resumed);
        Ok(())
    }

    #[test]
    fn step_request_completed_step_is_optional() -> Result<()> {
        let request: SignupStepRequest =
            serde_json::from_str(r#"{"next_step": "verify_phone"}"#)?;
        assert_eq!(request.next_step, "verify_phone");
        assert!(request.completed_step.is_none());
        Ok(())
    }
}
