//! Command-line argument dispatch.
//!
//! This module maps validated CLI matches to the action to run, such as
//! starting the API server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, vault};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let vault = vault::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;

    Ok(Action::Server(Args { port, dsn, vault, auth }))
}
