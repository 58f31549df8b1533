//! Signing and verification of the three token kinds.
//!
//! Pure: no I/O, and the current time is always passed in. Expiry is checked
//! here against that time rather than by `jsonwebtoken` against the wall
//! clock, with zero leeway.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Signup,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Signup => "signup",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precise verification failure. Logged, never returned to a client.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signature does not match")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(i64),
    #[error("expected a {expected} token, found type {found:?}")]
    WrongType { expected: TokenKind, found: String },
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
    #[error("{0} token expiry is out of range")]
    ExpiryOverflow(TokenKind),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub token_id: Uuid,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignupClaims {
    pub attempt_id: Uuid,
    pub email: String,
    pub current_step: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

trait TypedClaims: DeserializeOwned {
    const KIND: TokenKind;
    fn token_type(&self) -> &str;
    fn exp(&self) -> i64;
}

impl TypedClaims for AccessClaims {
    const KIND: TokenKind = TokenKind::Access;
    fn token_type(&self) -> &str {
        &self.token_type
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TypedClaims for RefreshClaims {
    const KIND: TokenKind = TokenKind::Refresh;
    fn token_type(&self) -> &str {
        &self.token_type
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TypedClaims for SignupClaims {
    const KIND: TokenKind = TokenKind::Signup;
    fn token_type(&self) -> &str {
        &self.token_type
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }
}

pub struct TokenCodec {
    access: SigningKey,
    refresh: SigningKey,
    signup: SigningKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    signup_ttl: Duration,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("signup_ttl", &self.signup_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secrets = config.secrets();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            access: SigningKey::from_secret(&secrets.access),
            refresh: SigningKey::from_secret(&secrets.refresh),
            signup: SigningKey::from_secret(&secrets.signup),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            signup_ttl: config.signup_token_ttl(),
            validation,
        }
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::Signup => &self.signup,
        }
    }

    #[must_use]
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Signup => self.signup_ttl,
        }
    }

    fn expires_at(&self, kind: TokenKind, now: DateTime<Utc>) -> Result<DateTime<Utc>, TokenError> {
        now.checked_add_signed(self.ttl(kind))
            .ok_or(TokenError::ExpiryOverflow(kind))
    }

    fn sign<C: Serialize>(&self, kind: TokenKind, claims: &C) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key(kind).encoding)
            .map_err(TokenError::Encode)
    }

    fn verify<C: TypedClaims>(&self, token: &str, now: DateTime<Utc>) -> Result<C, TokenError> {
        let claims = decode::<C>(token, &self.key(C::KIND).decoding, &self.validation)?.claims;
        if claims.token_type() != C::KIND.as_str() {
            return Err(TokenError::WrongType {
                expected: C::KIND,
                found: claims.token_type().to_string(),
            });
        }
        if claims.exp() <= now.timestamp() {
            return Err(TokenError::Expired(claims.exp()));
        }
        Ok(claims)
    }

    /// # Errors
    /// Returns [`TokenError::Encode`] if signing fails and
    /// [`TokenError::ExpiryOverflow`] if the expiry is not representable.
    pub fn encode_access(
        &self,
        user_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: user_id,
            email: email.to_string(),
            token_type: TokenKind::Access.as_str().to_string(),
            iat: now.timestamp(),
            exp: self.expires_at(TokenKind::Access, now)?.timestamp(),
        };
        self.sign(TokenKind::Access, &claims)
    }

    /// Returns the token and its expiry.
    ///
    /// # Errors
    /// Returns [`TokenError::Encode`] if signing fails and
    /// [`TokenError::ExpiryOverflow`] if the expiry is not representable.
    pub fn encode_refresh(
        &self,
        user_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let expires_at = self.expires_at(TokenKind::Refresh, now)?;
        let claims = RefreshClaims {
            sub: user_id,
            token_id,
            token_type: TokenKind::Refresh.as_str().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        Ok((self.sign(TokenKind::Refresh, &claims)?, expires_at))
    }

    /// # Errors
    /// Returns [`TokenError::Encode`] if signing fails and
    /// [`TokenError::ExpiryOverflow`] if the expiry is not representable.
    pub fn encode_signup(
        &self,
        attempt_id: Uuid,
        email: &str,
        current_step: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = SignupClaims {
            attempt_id,
            email: email.to_string(),
            current_step: current_step.to_string(),
            token_type: TokenKind::Signup.as_str().to_string(),
            iat: now.timestamp(),
            exp: self.expires_at(TokenKind::Signup, now)?.timestamp(),
        };
        self.sign(TokenKind::Signup, &claims)
    }

    /// # Errors
    /// Returns a [`TokenError`] naming the precise cause.
    pub fn decode_access(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        self.verify(token, now)
    }

    /// # Errors
    /// Returns a [`TokenError`] naming the precise cause.
    pub fn decode_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshClaims, TokenError> {
        self.verify(token, now)
    }

    /// # Errors
    /// Returns a [`TokenError`] naming the precise cause.
    pub fn decode_signup(&self, token: &str, now: DateTime<Utc>) -> Result<SignupClaims, TokenError> {
        self.verify(token, now)
    }
}
