use crate::{
    api::{self, handlers::AppState},
    cli::{
        commands::{auth, vault as vault_opts},
        globals::GlobalArgs,
    },
    clock::SystemClock,
    config::{AuthConfig, SigningSecrets},
    session::SessionOrchestrator,
    store::{CredentialStore, MemoryStore, PgStore},
    sweeper::{self, SweeperConfig},
    vault,
};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// DSN that selects the in-process store instead of PostgreSQL.
pub const MEMORY_DSN: &str = "memory://";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault: Option<vault_opts::Options>,
    pub auth: auth::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if Vault login fails, secrets are missing or invalid, the
/// database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut dsn = args.dsn;
    let local = local_secrets(&args.auth);

    let secrets = if let Some(opts) = &args.vault {
        let globals = vault_login(opts).await?;

        let secrets = match local {
            Some(secrets) => secrets,
            None => vault::kv::read_signing_secrets(&globals, &opts.kv_mount, &opts.kv_path)
                .await
                .context("Failed to load token signing secrets from Vault")?,
        };

        let mut globals = globals;
        if dsn != MEMORY_DSN {
            vault::database::database_creds(&mut globals)
                .await
                .context("Could not get database username and password")?;
            dsn = dsn_with_credentials(
                &dsn,
                &globals.vault_db_username,
                &globals.vault_db_password,
            )?;
        }

        debug!("Global args: {:?}", globals);

        // Renew vault token and DB lease, gracefully shutdown if failed
        vault::renew::try_renew(&globals, tx.clone()).await?;

        secrets
    } else {
        local.ok_or_else(|| anyhow!("Token signing secrets are required without --vault-url"))?
    };

    let config = AuthConfig::new(secrets)
        .context("Invalid token signing secrets")?
        .with_access_token_ttl_seconds(args.auth.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.auth.refresh_token_ttl_seconds)
        .with_signup_token_ttl_seconds(args.auth.signup_token_ttl_seconds)
        .with_signup_attempt_ttl_seconds(args.auth.signup_attempt_ttl_seconds)
        .with_refresh_rotation_days(args.auth.refresh_rotation_days)
        .with_password_hash_cost(args.auth.password_hash_cost)
        .with_cookie_secure(args.auth.cookie_secure);

    let store = connect_store(&dsn).await?;

    let sessions = SessionOrchestrator::new(&config, store, Arc::new(SystemClock))?;

    sweeper::spawn(
        sessions.signups().clone(),
        SweeperConfig::new().with_interval_seconds(args.auth.sweep_interval_seconds),
    );

    // Hold a sender so `rx` only yields on renewal failure.
    let _tx = tx;

    api::new(args.port, AppState::new(sessions, &config), rx).await
}

fn local_secrets(opts: &auth::Options) -> Option<SigningSecrets> {
    Some(SigningSecrets {
        access: opts.access_token_secret.clone()?,
        refresh: opts.refresh_token_secret.clone()?,
        signup: opts.signup_token_secret.clone()?,
    })
}

/// `AppRole` login, unwrapping the secret id first when given a wrapped token.
async fn vault_login(opts: &vault_opts::Options) -> Result<GlobalArgs> {
    let mut globals = GlobalArgs::new(opts.url.clone());

    let secret_id = if let Some(wrapped) = &opts.wrapped_token {
        vault::unwrap(&globals.vault_url, wrapped).await?
    } else {
        opts.secret_id
            .clone()
            .ok_or_else(|| anyhow!("Vault secret-id is required"))?
    };

    let (token, lease_duration) =
        vault::approle_login(&globals.vault_url, &secret_id, &opts.role_id).await?;
    info!("Logged in to Vault, token lease {} seconds", lease_duration);

    globals.set_token(SecretString::from(token));
    Ok(globals)
}

fn dsn_with_credentials(dsn: &str, username: &str, password: &SecretString) -> Result<String> {
    let mut dsn = Url::parse(dsn).context("Invalid DSN")?;

    dsn.set_username(username)
        .map_err(|()| anyhow!("Error setting username"))?;

    dsn.set_password(Some(password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(dsn.to_string())
}

async fn connect_store(dsn: &str) -> Result<Arc<dyn CredentialStore>> {
    if dsn == MEMORY_DSN {
        warn!("Using the in-memory credential store; all state is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgStore::new(pool)))
}
