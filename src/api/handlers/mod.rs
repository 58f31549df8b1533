//! API handlers and shared utilities for Tessera.
//!
//! Handlers stay thin: they validate input, run a guard where the route needs
//! one, call the [`crate::session::SessionOrchestrator`] and map its outcome to
//! a status code, a JSON body and the refresh cookie.

pub mod error;
pub mod guards;
pub mod health;
pub mod me;
pub mod session;
pub mod signup;
pub mod state;
pub mod types;
pub mod utils;

pub use error::ApiError;
pub use guards::{Principal, SignupPrincipal, require_access, require_signup};
pub use state::AppState;
pub use utils::REFRESH_COOKIE_NAME;
