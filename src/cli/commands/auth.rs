use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::config::{MAX_REFRESH_ROTATION_DAYS, MAX_TTL_SECONDS};

pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_REFRESH_TOKEN_SECRET: &str = "refresh-token-secret";
pub const ARG_SIGNUP_TOKEN_SECRET: &str = "signup-token-secret";

/// Token, session and signup settings.
#[derive(Debug)]
pub struct Options {
    pub access_token_secret: Option<SecretString>,
    pub refresh_token_secret: Option<SecretString>,
    pub signup_token_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub signup_token_ttl_seconds: i64,
    pub signup_attempt_ttl_seconds: i64,
    pub refresh_rotation_days: i64,
    pub password_hash_cost: u32,
    pub cookie_secure: bool,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is unexpectedly missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = |name: &str| {
            matches
                .get_one::<String>(name)
                .map(|value| SecretString::from(value.clone()))
        };
        let required = |name: &str| anyhow::anyhow!("missing required argument: --{name}");

        Ok(Self {
            access_token_secret: secret(ARG_ACCESS_TOKEN_SECRET),
            refresh_token_secret: secret(ARG_REFRESH_TOKEN_SECRET),
            signup_token_secret: secret(ARG_SIGNUP_TOKEN_SECRET),
            access_token_ttl_seconds: matches
                .get_one::<i64>("access-token-ttl-seconds")
                .copied()
                .ok_or_else(|| required("access-token-ttl-seconds"))?,
            refresh_token_ttl_seconds: matches
                .get_one::<i64>("refresh-token-ttl-seconds")
                .copied()
                .ok_or_else(|| required("refresh-token-ttl-seconds"))?,
            signup_token_ttl_seconds: matches
                .get_one::<i64>("signup-token-ttl-seconds")
                .copied()
                .ok_or_else(|| required("signup-token-ttl-seconds"))?,
            signup_attempt_ttl_seconds: matches
                .get_one::<i64>("signup-attempt-ttl-seconds")
                .copied()
                .ok_or_else(|| required("signup-attempt-ttl-seconds"))?,
            refresh_rotation_days: matches
                .get_one::<i64>("refresh-rotation-days")
                .copied()
                .ok_or_else(|| required("refresh-rotation-days"))?,
            password_hash_cost: matches
                .get_one::<u32>("password-hash-cost")
                .copied()
                .ok_or_else(|| required("password-hash-cost"))?,
            cookie_secure: matches
                .get_one::<bool>("cookie-secure")
                .copied()
                .unwrap_or(true),
            sweep_interval_seconds: matches
                .get_one::<u64>("sweep-interval-seconds")
                .copied()
                .ok_or_else(|| required("sweep-interval-seconds"))?,
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_secret_args(command);
    let command = with_token_args(command);
    with_signup_args(command)
}

fn with_secret_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("HMAC secret for access tokens (read from Vault when --vault-url is set)")
                .env("TESSERA_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required_unless_present(super::vault::ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_SECRET)
                .long(ARG_REFRESH_TOKEN_SECRET)
                .help("HMAC secret for refresh tokens (read from Vault when --vault-url is set)")
                .env("TESSERA_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required_unless_present(super::vault::ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_SIGNUP_TOKEN_SECRET)
                .long(ARG_SIGNUP_TOKEN_SECRET)
                .help("HMAC secret for signup tokens (read from Vault when --vault-url is set)")
                .env("TESSERA_SIGNUP_TOKEN_SECRET")
                .hide_env_values(true)
                .required_unless_present(super::vault::ARG_VAULT_URL),
        )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("TESSERA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token lifetime in seconds, also the refresh cookie Max-Age")
                .env("TESSERA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("refresh-rotation-days")
                .long("refresh-rotation-days")
                .help("Rotate refresh tokens once they are at least this many days old")
                .env("TESSERA_REFRESH_ROTATION_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64).range(0..=MAX_REFRESH_ROTATION_DAYS)),
        )
        .arg(
            Arg::new("password-hash-cost")
                .long("password-hash-cost")
                .help("Argon2 time cost for password hashing")
                .env("TESSERA_PASSWORD_HASH_COST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark the refresh cookie Secure (disable only for plain-HTTP development)")
                .env("TESSERA_COOKIE_SECURE")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}

fn with_signup_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("signup-token-ttl-seconds")
                .long("signup-token-ttl-seconds")
                .help("Signup token lifetime in seconds")
                .env("TESSERA_SIGNUP_TOKEN_TTL_SECONDS")
                .default_value("7200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("signup-attempt-ttl-seconds")
                .long("signup-attempt-ttl-seconds")
                .help("How long a signup attempt stays resumable, in seconds")
                .env("TESSERA_SIGNUP_ATTEMPT_TTL_SECONDS")
                .default_value("7200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("Interval between sweeps of expired signup attempts")
                .env("TESSERA_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
