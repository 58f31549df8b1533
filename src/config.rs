//! Authentication settings: signing secrets, token lifetimes and policy knobs.

use anyhow::{Result, bail};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
pub const DEFAULT_SIGNUP_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;
pub const DEFAULT_SIGNUP_ATTEMPT_TTL_SECONDS: i64 = 2 * 60 * 60;
pub const DEFAULT_REFRESH_ROTATION_DAYS: i64 = 7;
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Upper bound for every token and attempt lifetime.
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
pub const MAX_REFRESH_ROTATION_DAYS: i64 = 10 * 365;

/// The three signing secrets. Each token kind gets its own key.
#[derive(Debug)]
pub struct SigningSecrets {
    pub access: SecretString,
    pub refresh: SecretString,
    pub signup: SecretString,
}

impl SigningSecrets {
    /// Reject empty or shared secrets.
    ///
    /// # Errors
    /// Returns an error if any secret is empty or two secrets are identical.
    pub fn validate(&self) -> Result<()> {
        let access = self.access.expose_secret();
        let refresh = self.refresh.expose_secret();
        let signup = self.signup.expose_secret();

        for (name, value) in [("access", access), ("refresh", refresh), ("signup", signup)] {
            if value.trim().is_empty() {
                bail!("{name} token secret is empty");
            }
        }
        if access == refresh || access == signup || refresh == signup {
            bail!("access, refresh and signup token secrets must be distinct");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct AuthConfig {
    secrets: SigningSecrets,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    signup_token_ttl: Duration,
    signup_attempt_ttl: Duration,
    refresh_rotation_threshold: Duration,
    password_hash_cost: u32,
    cookie_secure: bool,
}

impl AuthConfig {
    /// # Errors
    /// Returns an error if the secrets fail [`SigningSecrets::validate`].
    pub fn new(secrets: SigningSecrets) -> Result<Self> {
        secrets.validate()?;
        Ok(Self {
            secrets,
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            signup_token_ttl: Duration::seconds(DEFAULT_SIGNUP_TOKEN_TTL_SECONDS),
            signup_attempt_ttl: Duration::seconds(DEFAULT_SIGNUP_ATTEMPT_TTL_SECONDS),
            refresh_rotation_threshold: Duration::days(DEFAULT_REFRESH_ROTATION_DAYS),
            password_hash_cost: DEFAULT_PASSWORD_HASH_COST,
            cookie_secure: true,
        })
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_signup_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.signup_token_ttl = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_signup_attempt_ttl_seconds(mut self, seconds: i64) -> Self {
        self.signup_attempt_ttl = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_refresh_rotation_days(mut self, days: i64) -> Self {
        self.refresh_rotation_threshold = Duration::try_days(days).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_password_hash_cost(mut self, cost: u32) -> Self {
        self.password_hash_cost = cost;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Reject lifetimes outside `1..=MAX_TTL_SECONDS` and rotation thresholds
    /// outside `0..=MAX_REFRESH_ROTATION_DAYS`.
    ///
    /// # Errors
    /// Returns an error naming the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        let max_ttl = Duration::seconds(MAX_TTL_SECONDS);
        for (name, ttl) in [
            ("access token ttl", self.access_token_ttl),
            ("refresh token ttl", self.refresh_token_ttl),
            ("signup token ttl", self.signup_token_ttl),
            ("signup attempt ttl", self.signup_attempt_ttl),
        ] {
            if ttl <= Duration::zero() || ttl > max_ttl {
                bail!("{name} must be between 1 and {MAX_TTL_SECONDS} seconds");
            }
        }
        if self.refresh_rotation_threshold < Duration::zero()
            || self.refresh_rotation_threshold > Duration::days(MAX_REFRESH_ROTATION_DAYS)
        {
            bail!("refresh rotation must be between 0 and {MAX_REFRESH_ROTATION_DAYS} days");
        }
        Ok(())
    }

    #[must_use]
    pub fn secrets(&self) -> &SigningSecrets {
        &self.secrets
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn signup_token_ttl(&self) -> Duration {
        self.signup_token_ttl
    }

    #[must_use]
    pub fn signup_attempt_ttl(&self) -> Duration {
        self.signup_attempt_ttl
    }

    #[must_use]
    pub fn refresh_rotation_threshold(&self) -> Duration {
        self.refresh_rotation_threshold
    }

    #[must_use]
    pub fn password_hash_cost(&self) -> u32 {
        self.password_hash_cost
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

#[cfg(test)]
pub(crate) fn test_secrets() -> SigningSecrets {
    SigningSecrets {
        access: SecretString::from("access-secret-for-tests".to_string()),
        refresh: SecretString::from("refresh-secret-for-tests".to_string()),
        signup: SecretString::from("signup-secret-for-tests".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(access: &str, refresh: &str, signup: &str) -> SigningSecrets {
        SigningSecrets {
            access: SecretString::from(access.to_string()),
            refresh: SecretString::from(refresh.to_string()),
            signup: SecretString::from(signup.to_string()),
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<()> {
        let config = AuthConfig::new(test_secrets())?;
        assert_eq!(config.access_token_ttl(), Duration::minutes(15));
        assert_eq!(config.refresh_token_ttl(), Duration::days(30));
        assert_eq!(config.signup_token_ttl(), Duration::hours(2));
        assert_eq!(config.signup_attempt_ttl(), Duration::hours(2));
        assert_eq!(config.refresh_rotation_threshold(), Duration::days(7));
        assert_eq!(config.password_hash_cost(), 10);
        assert!(config.cookie_secure());
        Ok(())
    }

    #[test]
    fn shared_secrets_are_rejected() {
        assert!(AuthConfig::new(secrets("same", "same", "other")).is_err());
        assert!(AuthConfig::new(secrets("a", "b", "a")).is_err());
        assert!(AuthConfig::new(secrets("a", "b", "b")).is_err());
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = AuthConfig::new(secrets("a", " ", "c")).err();
        assert!(err.is_some_and(|err| err.to_string().contains("refresh")));
    }

    #[test]
    fn builder_overrides() -> Result<()> {
        let config = AuthConfig::new(test_secrets())?
            .with_access_token_ttl_seconds(60)
            .with_refresh_rotation_days(1)
            .with_cookie_secure(false);
        assert_eq!(config.access_token_ttl(), Duration::seconds(60));
        assert_eq!(config.refresh_rotation_threshold(), Duration::days(1));
        assert!(!config.cookie_secure());
        Ok(())
    }

    #[test]
    fn out_of_range_lifetimes_are_rejected() -> Result<()> {
        assert!(AuthConfig::new(test_secrets())?.validate().is_ok());

        let huge = AuthConfig::new(test_secrets())?.with_refresh_token_ttl_seconds(9_000_000_000_000);
        assert!(huge.validate().is_err());

        let beyond_duration = AuthConfig::new(test_secrets())?.with_access_token_ttl_seconds(i64::MAX);
        assert!(beyond_duration.validate().is_err());

        let zero = AuthConfig::new(test_secrets())?.with_signup_attempt_ttl_seconds(0);
        assert!(zero.validate().is_err());

        let rotation = AuthConfig::new(test_secrets())?.with_refresh_rotation_days(i64::MAX);
        assert!(rotation.validate().is_err());

        let at_limit = AuthConfig::new(test_secrets())?
            .with_signup_token_ttl_seconds(MAX_TTL_SECONDS)
            .with_refresh_rotation_days(0);
        assert!(at_limit.validate().is_ok());
        Ok(())
    }

    #[test]
    fn debug_output_redacts_secrets() -> Result<()> {
        let config = AuthConfig::new(test_secrets())?;
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("access-secret-for-tests"));
        Ok(())
    }
}
