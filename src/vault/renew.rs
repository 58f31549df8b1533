use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng, rngs::StdRng};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::future::Future;
use tokio::{
    sync::mpsc,
    time::{Duration, sleep},
};
use tracing::{debug, error, instrument, warn};

const MAX_ATTEMPTS: u32 = 3;

/// Renew a Vault token
#[instrument(skip(token))]
async fn renew_token(url: &str, token: &SecretString, increment: Option<u64>) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/auth/token/renew-self")?;

    let payload = json!({
        "increment": increment.unwrap_or(0)
    });

    let response = vault::client()?
        .post(&renew_url)
        .json(&payload)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(vault::response_error(&renew_url, response).await);
    }

    let json_response: Value = response.json().await?;

    json_response["auth"]["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew the database credential lease
#[instrument(skip(token))]
async fn renew_db_token(
    url: &str,
    token: &SecretString,
    lease_id: &str,
    increment: u64,
) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/sys/leases/renew")?;

    let payload = json!({
        "lease_id": lease_id,
        "increment": increment
    });

    let response = vault::client()?
        .put(&renew_url)
        .json(&payload)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(vault::response_error(&renew_url, response).await);
    }

    let json_response: Value = response.json().await?;

    json_response["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// 70-90% of the lease, so renewal happens before it lapses.
fn jittered(lease_duration: u64, rng: &mut StdRng) -> Duration {
    let factor = rng.gen_range(70..90);
    Duration::from_secs(lease_duration * factor / 100)
}

/// Run `renew` forever, sleeping a jittered share of each returned lease.
/// Gives up after three consecutive failures and signals `tx`.
async fn renew_loop<F, Fut>(what: &'static str, tx: mpsc::UnboundedSender<()>, mut renew: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let mut rng = StdRng::from_entropy();

    loop {
        let mut next = Duration::default();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let backoff_time = 2u64.pow(attempt - 1);
                warn!("Backing off for {} seconds", backoff_time);
                sleep(Duration::from_secs(backoff_time)).await;
            }

            match renew().await {
                Ok(lease_duration) => {
                    next = jittered(lease_duration, &mut rng);
                    break;
                }
                Err(e) => {
                    error!("Failed to renew {}: {}", what, e);

                    if attempt == MAX_ATTEMPTS {
                        error!("Failed to renew {} after {} attempts", what, MAX_ATTEMPTS);
                        let _ = tx.send(());
                        return;
                    }
                }
            }
        }

        debug!("Will renew {} in {} seconds", what, next.as_secs());

        sleep(next).await;
    }
}

/// Keep the Vault token, and the DB lease when there is one, alive in the
/// background. A message on `tx` means renewal gave up and the server should
/// shut down.
/// # Errors
/// Never returns an error; renewal failures are reported through `tx`.
#[instrument(skip(globals, tx))]
pub async fn try_renew(globals: &GlobalArgs, tx: mpsc::UnboundedSender<()>) -> Result<()> {
    tokio::spawn({
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let tx = tx.clone();

        async move {
            renew_loop("token", tx, || renew_token(&url, &token, None)).await;
        }
    });

    if globals.has_db_lease() {
        tokio::spawn({
            let url = globals.vault_url.clone();
            let token = globals.vault_token.clone();
            let lease_id = globals.vault_db_lease_id.clone();
            let increment = globals.vault_db_lease_duration;

            async move {
                renew_loop("DB lease", tx, || {
                    renew_db_token(&url, &token, &lease_id, increment)
                })
                .await;
            }
        });
    }

    Ok(())
}
