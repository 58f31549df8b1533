pub mod auth;
pub mod logging;
pub mod vault;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

use self::vault::{ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_URL, ARG_VAULT_WRAPPED_TOKEN};

/// Validate that Vault auth arguments are complete when a Vault URL is given.
///
/// # Errors
/// Returns an error string if `vault-url` is set but the `AppRole` arguments are missing.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    if !matches.contains_id(ARG_VAULT_URL) {
        return Ok(());
    }

    if !matches.contains_id(ARG_VAULT_ROLE_ID) {
        return Err(format!(
            "Missing required argument: --{ARG_VAULT_ROLE_ID} (required with --{ARG_VAULT_URL})"
        ));
    }
    if !matches.contains_id(ARG_VAULT_SECRET_ID) && !matches.contains_id(ARG_VAULT_WRAPPED_TOKEN) {
        return Err(format!(
            "Missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN} (required with --{ARG_VAULT_URL})"
        ));
    }
    Ok(())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("tessera")
        .about("Session tokens and resumable signup")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("TESSERA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Database connection string. With --vault-url the username/password are injected from Vault DB creds. Use memory:// for a throwaway in-process store.",
                )
                .env("TESSERA_DSN")
                .required(true),
        );

    let command = vault::with_args(command);
    let command = auth::with_args(command);
    logging::with_args(command)
}
