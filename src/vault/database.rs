use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;

pub const DB_CREDS_PATH: &str = "/v1/database/creds/tessera";

/// Get DB credentials from Vault
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(globals))]
pub async fn database_creds(globals: &mut GlobalArgs) -> Result<()> {
    let db_creds = vault::endpoint_url(&globals.vault_url, DB_CREDS_PATH)?;

    let response = vault::client()?
        .get(db_creds.as_str())
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(vault::response_error(&db_creds, response).await);
    }

    let json_response: Value = response.json().await?;
    apply_creds(globals, &json_response)
}

fn apply_creds(globals: &mut GlobalArgs, json_response: &Value) -> Result<()> {
    let lease_id = json_response["lease_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_id found"))?;

    let lease_duration = json_response["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))?;

    let username = json_response["data"]["username"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no username found"))?;

    let password = json_response["data"]["password"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no password found"))?;

    globals.vault_db_lease_id = lease_id.to_string();
    globals.vault_db_lease_duration = lease_duration;
    globals.vault_db_username = username.to_string();
    globals.vault_db_password = SecretString::from(password.to_string());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn creds_update_globals() -> Result<()> {
        let mut globals = GlobalArgs::new("https://vault.tld:8200".to_string());
        apply_creds(
            &mut globals,
            &json!({
                "lease_id": "database/creds/tessera/abc",
                "lease_duration": 55,
                "data": {"username": "user", "password": "pass"}
            }),
        )?;

        assert_eq!(globals.vault_db_lease_id, "database/creds/tessera/abc");
        assert_eq!(globals.vault_db_lease_duration, 55);
        assert_eq!(globals.vault_db_username, "user");
        assert_eq!(globals.vault_db_password.expose_secret(), "pass");
        assert!(globals.has_db_lease());
        Ok(())
    }

    #[test]
    fn partial_creds_leave_globals_untouched() {
        let mut globals = GlobalArgs::new("https://vault.tld:8200".to_string());
        let result = apply_creds(
            &mut globals,
            &json!({"lease_id": "x", "lease_duration": 55, "data": {"username": "user"}}),
        );

        assert!(result.is_err());
        assert!(!globals.has_db_lease());
    }
}
