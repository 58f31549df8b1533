//! Access, refresh and signup tokens.
//!
//! [`codec`] signs and verifies; [`service`] adds refresh-token persistence,
//! rotation and revocation on top of the credential store.

pub mod codec;
pub mod service;

pub use codec::{AccessClaims, RefreshClaims, SignupClaims, TokenCodec, TokenError, TokenKind};
pub use service::{RefreshTokenMaterial, TokenService};
