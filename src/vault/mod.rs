pub mod database;
pub mod kv;
pub mod renew;

use crate::APP_USER_AGENT;
use anyhow::{Result, anyhow};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Build `scheme://host:port{path}` from the configured Vault URL, which may
/// itself point at the `AppRole` login endpoint.
///
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
#[instrument]
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// Turn a non-success Vault response into an error carrying Vault's first message.
pub(crate) async fn response_error(url: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body["errors"][0].as_str().map(str::to_string))
        .unwrap_or_default();

    anyhow!("{url} - {status}, {message}")
}

/// Unwrap a wrapped Vault client token
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/tessera/secret-id
/// # Errors
/// Returns an error if the Vault request fails or the response has no `secret_id`.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;

    let response = client()?
        .post(&unwrap_url)
        .header("X-Vault-Token", token)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(response_error(&unwrap_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let sid = json_response["data"]["secret_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(sid.to_string())
}

/// Login to Vault using `AppRole`; `url` is the login endpoint itself.
/// Create a secret ID with:
/// vault write -f auth/approle/role/tessera/secret-id
/// # Errors
/// Returns an error if the Vault request fails or the response has no `client_token`.
#[instrument(skip(sid))]
pub async fn approle_login(url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", url, rid);

    let response = client()?.post(url).json(&login_payload).send().await?;

    if !response.status().is_success() {
        return Err(response_error(url, response).await);
    }

    let json_response: Value = response.json().await?;
    let token = json_response["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}
