use crate::{cli::globals::GlobalArgs, config::SigningSecrets, vault};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{Instrument, info_span, instrument};

pub const ACCESS_TOKEN_SECRET_FIELD: &str = "access_token_secret";
pub const REFRESH_TOKEN_SECRET_FIELD: &str = "refresh_token_secret";
pub const SIGNUP_TOKEN_SECRET_FIELD: &str = "signup_token_secret";

/// Read the three token signing secrets from a KV-v2 secret.
///
/// # Errors
/// Returns an error if the Vault request fails or a field is missing.
#[instrument(skip(globals))]
pub async fn read_signing_secrets(
    globals: &GlobalArgs,
    kv_mount: &str,
    kv_path: &str,
) -> Result<SigningSecrets> {
    let path = format!("/v1/{kv_mount}/data/{kv_path}");
    let url = vault::endpoint_url(&globals.vault_url, &path)?;

    let span = info_span!(
        "vault.kv.read",
        http.method = "GET",
        url = %url
    );
    let response = vault::client()?
        .get(&url)
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        return Err(vault::response_error(&url, response).await);
    }

    let json: Value = response.json().await?;
    signing_secrets_from(&json)
}

/// Extract the secrets from a KV-v2 read response (`data.data.<field>`).
fn signing_secrets_from(json: &Value) -> Result<SigningSecrets> {
    let field = |name: &str| -> Result<SecretString> {
        json.get("data")
            .and_then(|data| data.get("data"))
            .and_then(|data| data.get(name))
            .and_then(Value::as_str)
            .map(|value| SecretString::from(value.to_string()))
            .with_context(|| format!("{name} missing from vault response"))
    };

    Ok(SigningSecrets {
        access: field(ACCESS_TOKEN_SECRET_FIELD)?,
        refresh: field(REFRESH_TOKEN_SECRET_FIELD)?,
        signup: field(SIGNUP_TOKEN_SECRET_FIELD)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_all_three_fields() -> Result<()> {
        let response = json!({
            "data": {
                "data": {
                    "access_token_secret": "a",
                    "refresh_token_secret": "r",
                    "signup_token_secret": "s"
                },
                "metadata": {"version": 3}
            }
        });

        let secrets = signing_secrets_from(&response)?;
        assert_eq!(secrets.access.expose_secret(), "a");
        assert_eq!(secrets.refresh.expose_secret(), "r");
        assert_eq!(secrets.signup.expose_secret(), "s");
        Ok(())
    }

    #[test]
    fn missing_field_is_named() {
        let response = json!({
            "data": {"data": {"access_token_secret": "a", "refresh_token_secret": "r"}}
        });

        let err = signing_secrets_from(&response).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("signup_token_secret missing from vault response")
        );
    }
}
