//! # Tessera (session tokens and resumable signup)
//!
//! `tessera` is the authentication core of a web backend. It issues, verifies,
//! rotates and revokes signed session tokens, and drives a resumable,
//! multi-step signup guarded by its own short-lived token.
//!
//! ## Token kinds
//!
//! Three independent `HS256` token kinds are issued, each signed with its own
//! secret and carrying a `type` claim that is checked on every verify:
//!
//! - **access** (15 minutes): authorizes API calls, never persisted.
//! - **refresh** (30 days): persisted in `refresh_tokens`, exchanged for new
//!   access tokens and rotated once older than the rotation threshold.
//! - **signup** (2 hours): binds a client to one in-progress signup attempt.
//!
//! ## Signup attempts
//!
//! At most one `in_progress` attempt exists per email. Re-submitting signup
//! resumes the live attempt instead of creating a second one; a background
//! sweep moves stale attempts to `expired`.

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod password;
pub mod session;
pub mod signup;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
